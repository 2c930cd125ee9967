//! The per-run supervision loop of a component.
//!
//! ```text
//! set_up ─► loop {
//!   ├─► stop requested?            ─► exit (nothing reported)
//!   ├─► wait (races stop token)
//!   ├─► pre_execute ─► execute ─► post_execute
//!   │     ├─ Ok  ─► reset backoff
//!   │     └─ Err ─► classify
//!   │           ├─ Continue  ─► next wait
//!   │           ├─ Backoff   ─► sleep(backoff.advance()) ─► next wait
//!   │           └─ Terminate ─► publish on error channel ─► exit
//! } ─► tear_down
//! ```

use super::state::{ComponentState, ComponentStatus};
use super::worker::Worker;
use crate::backoff::Backoff;
use crate::error::WorkerError;
use crate::messaging::{ErrorChannel, ErrorReport, ExitNotifier, RunId, WorkerExit};
use crate::strategy::{Classification, ErrorAction, ErrorStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a single run needs, detached from the owning [`Component`](super::Component).
pub(crate) struct RunContext {
    pub name: String,
    pub run_id: RunId,
    pub token: CancellationToken,
    pub strategy: Arc<dyn ErrorStrategy>,
    pub errors: ErrorChannel,
    pub backoff_ceiling: u64,
    pub status: Arc<watch::Sender<ComponentStatus>>,
    pub exits: Option<ExitNotifier>,
}

impl RunContext {
    fn publish(&self, state: ComponentState, backoff: Duration) {
        let run_id = self.run_id;
        self.status.send_modify(|status| {
            status.state = state;
            status.backoff = backoff;
            status.run_id = Some(run_id);
        });
    }
}

enum Outcome {
    /// Stop token observed; not an error.
    Stopped,
    /// A terminal classification was reported on the error channel.
    Terminated(Classification),
}

/// Marks the run as finished and, unless the stop was requested, tells the
/// client that the worker is gone. Runs on panic as well.
struct ExitGuard {
    name: String,
    run_id: RunId,
    status: Arc<watch::Sender<ComponentStatus>>,
    exits: Option<ExitNotifier>,
    requested: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.status.send_modify(|status| {
            status.state = ComponentState::Terminated;
        });

        if self.requested {
            return;
        }
        if let Some(exits) = &self.exits {
            let notice = WorkerExit {
                component: self.name.clone(),
                run_id: self.run_id,
            };
            if !exits.notify(notice) {
                debug!("Exit notice for {} dropped, client already notified", self.name);
            }
        }
    }
}

pub(crate) async fn run<W: Worker>(worker: Arc<Mutex<W>>, ctx: RunContext) {
    let mut guard = ExitGuard {
        name: ctx.name.clone(),
        run_id: ctx.run_id,
        status: Arc::clone(&ctx.status),
        exits: ctx.exits.clone(),
        requested: false,
    };

    let mut worker = worker.lock().await;
    let outcome = supervise(&mut *worker, &ctx).await;

    ctx.publish(ComponentState::Terminating, Duration::ZERO);
    let teardown = worker.tear_down().await;
    drop(worker);

    if let Err(e) = teardown {
        warn!("{} tear-down failed: {}", ctx.name, e);
    }

    match outcome {
        Outcome::Stopped => {
            guard.requested = true;
            debug!("{} shutting down", ctx.name);
        }
        Outcome::Terminated(classification) => {
            info!(
                "{} exited after {} failure (action: {})",
                ctx.name,
                if classification.expected {
                    "expected"
                } else {
                    "unexpected"
                },
                classification.action
            );
        }
    }
}

async fn supervise<W: Worker>(worker: &mut W, ctx: &RunContext) -> Outcome {
    let mut backoff = Backoff::new(ctx.backoff_ceiling);
    ctx.publish(ComponentState::Running, Duration::ZERO);

    if let Err(error) = worker.set_up().await {
        if let Some(outcome) = on_failure(error, &mut backoff, ctx).await {
            return outcome;
        }
    }

    loop {
        if ctx.token.is_cancelled() {
            return Outcome::Stopped;
        }

        let ready = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Outcome::Stopped,
            ready = worker.wait() => ready,
        };

        let result = match ready {
            Ok(()) => {
                debug!("{} received notification, running execute", ctx.name);
                execute_once(worker).await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                if backoff.current() > Duration::ZERO {
                    backoff.reset();
                    ctx.publish(ComponentState::Running, Duration::ZERO);
                }
            }
            Err(error) => {
                if let Some(outcome) = on_failure(error, &mut backoff, ctx).await {
                    return outcome;
                }
            }
        }
    }
}

async fn execute_once<W: Worker>(worker: &mut W) -> Result<(), WorkerError> {
    worker.pre_execute().await?;
    let output = worker.execute().await?;
    worker.post_execute(output).await
}

/// Apply the strategy to a failure. Returns an outcome when the loop must end.
async fn on_failure(
    error: WorkerError,
    backoff: &mut Backoff,
    ctx: &RunContext,
) -> Option<Outcome> {
    let classification = ctx.strategy.classify(&error);

    match classification.action {
        ErrorAction::Continue => {
            debug!("{} ignoring failure: {}", ctx.name, error);
            None
        }
        ErrorAction::Backoff => {
            let delay = backoff.advance();
            ctx.publish(ComponentState::Backoff, delay);
            warn!("{} backing off for {:?}: {}", ctx.name, delay, error);

            tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return Some(Outcome::Stopped),
                _ = tokio::time::sleep(delay) => {}
            }

            ctx.publish(ComponentState::Running, delay);
            None
        }
        ErrorAction::Terminate => {
            if classification.expected {
                warn!("{} terminating on expected failure: {}", ctx.name, error);
            } else {
                error!("{} terminating on unexpected failure: {}", ctx.name, error);
            }

            ctx.errors.publish(ErrorReport {
                component: ctx.name.clone(),
                classification,
            });
            Some(Outcome::Terminated(classification))
        }
    }
}
