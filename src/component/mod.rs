//! Supervised workers.
//!
//! A [`Component`] wraps a [`Worker`] and runs it on its own task under an
//! [`ErrorStrategy`]. It can be started, terminated and restarted any number
//! of times; each start gets a fresh stop token and a fresh backoff.

mod runner;
mod state;
mod worker;

#[cfg(test)]
mod tests;

pub use state::{ComponentState, ComponentStatus};
pub use worker::Worker;

use crate::messaging::{ErrorChannel, ExitNotifier, RunId};
use crate::strategy::ErrorStrategy;
use async_trait::async_trait;
use runner::RunContext;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default backoff ceiling of a component, in seconds.
pub const DEFAULT_BACKOFF_CEILING: u64 = 8;

/// Capability contract the client relies on to supervise a worker.
#[async_trait]
pub trait Supervised: Send {
    fn name(&self) -> &str;

    /// Start a new run unless one is alive. Resets backoff and stale stop signals.
    async fn start(&mut self);

    /// Request a stop and wait for the run to finish.
    async fn terminate(&mut self);

    /// Wait for the current run to finish. Returns at once when never started.
    async fn join(&mut self);

    fn is_alive(&self) -> bool;

    /// Identity of the current (or last unjoined) run.
    fn id(&self) -> Option<RunId>;

    fn status(&self) -> ComponentStatus;

    fn error_channel(&self) -> &ErrorChannel;

    /// Install the channel used to report exits nobody asked for.
    fn set_exit_notifier(&mut self, notifier: ExitNotifier);
}

struct ActiveRun {
    id: RunId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A worker under supervision.
pub struct Component<W: Worker> {
    name: String,
    worker: Arc<Mutex<W>>,
    strategy: Arc<dyn ErrorStrategy>,
    errors: ErrorChannel,
    backoff_ceiling: u64,
    status: Arc<watch::Sender<ComponentStatus>>,
    exits: Option<ExitNotifier>,
    run: Option<ActiveRun>,
}

impl<W: Worker> Component<W> {
    pub fn new<S: Into<String>>(
        name: S,
        worker: W,
        strategy: Arc<dyn ErrorStrategy>,
        errors: ErrorChannel,
    ) -> Self {
        let (status, _) = watch::channel(ComponentStatus::default());
        Self {
            name: name.into(),
            worker: Arc::new(Mutex::new(worker)),
            strategy,
            errors,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            status: Arc::new(status),
            exits: None,
            run: None,
        }
    }

    /// Set the backoff ceiling in seconds.
    pub fn with_backoff_ceiling(mut self, ceiling: u64) -> Self {
        self.backoff_ceiling = ceiling.max(1);
        self
    }

    pub fn backoff_ceiling(&self) -> u64 {
        self.backoff_ceiling
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<ComponentStatus> {
        self.status.subscribe()
    }

    /// Shared access to the worker. Blocks while a run holds it.
    pub fn worker(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.worker)
    }

    fn has_exited(&self) -> bool {
        self.status.borrow().state == ComponentState::Terminated
    }
}

#[async_trait]
impl<W: Worker> Supervised for Component<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) {
        if self.is_alive() {
            debug!("{} already running", self.name);
            return;
        }

        // Reap a finished run before starting a new one.
        self.join().await;

        self.worker.lock().await.reset().await;

        let run_id = RunId::next();
        let token = CancellationToken::new();
        self.status.send_replace(ComponentStatus {
            state: ComponentState::Running,
            backoff: std::time::Duration::ZERO,
            run_id: Some(run_id),
        });

        let ctx = RunContext {
            name: self.name.clone(),
            run_id,
            token: token.clone(),
            strategy: Arc::clone(&self.strategy),
            errors: self.errors.clone(),
            backoff_ceiling: self.backoff_ceiling,
            status: Arc::clone(&self.status),
            exits: self.exits.clone(),
        };
        let handle = tokio::spawn(runner::run(Arc::clone(&self.worker), ctx));

        info!("{} started (run {})", self.name, run_id.get());
        self.run = Some(ActiveRun {
            id: run_id,
            token,
            handle,
        });
    }

    async fn terminate(&mut self) {
        if let Some(run) = &self.run {
            if !run.token.is_cancelled() {
                debug!("Terminating {}", self.name);
                run.token.cancel();
            }
        }
        self.join().await;
    }

    async fn join(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        if let Err(e) = run.handle.await {
            if e.is_panic() {
                error!("{} run {} panicked", self.name, run.id.get());
            } else {
                error!("{} run {} was cancelled: {}", self.name, run.id.get(), e);
            }
            self.status.send_modify(|status| status.state = ComponentState::Terminated);
        }
        self.status.send_modify(|status| {
            status.state = ComponentState::Idle;
            status.backoff = std::time::Duration::ZERO;
        });
    }

    fn is_alive(&self) -> bool {
        match &self.run {
            Some(run) => !run.handle.is_finished() && !self.has_exited(),
            None => false,
        }
    }

    fn id(&self) -> Option<RunId> {
        self.run.as_ref().map(|run| run.id)
    }

    fn status(&self) -> ComponentStatus {
        *self.status.borrow()
    }

    fn error_channel(&self) -> &ErrorChannel {
        &self.errors
    }

    fn set_exit_notifier(&mut self, notifier: ExitNotifier) {
        self.exits = Some(notifier);
    }
}
