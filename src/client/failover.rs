use super::Client;
use crate::backoff::Backoff;
use crate::component::Supervised;
use crate::messaging::WorkerExit;
use crate::watch::{is_marker, FileChange};
use tracing::{debug, error, info, warn};

/// Result of one role-based reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOutcome {
    /// Backend is primary; both components are running.
    Primary,
    /// Backend is standby; both components are stopped.
    Standby,
    /// A shutdown request arrived while the role check was being retried.
    ShutDown,
}

impl Client {
    /// Start or stop both components according to the backend's current role.
    ///
    /// The role is fetched fresh on every call. While the backend cannot be
    /// reached both components stay stopped and the check is retried forever
    /// with a backoff of 1, 2, 4, ... seconds, wrapping at the retry ceiling.
    pub async fn execute_role_based_procedure(&mut self) -> RoleOutcome {
        let mut backoff = Backoff::new(self.retry_ceiling);
        loop {
            match self.role.is_primary().await {
                Ok(true) => {
                    warn!("Backend is primary, starting components");
                    self.start_components(true).await;
                    return RoleOutcome::Primary;
                }
                Ok(false) => {
                    warn!("Backend is standby, stopping components");
                    self.stop_components().await;
                    return RoleOutcome::Standby;
                }
                Err(e) => {
                    self.stop_components().await;
                    let delay = backoff.advance();
                    warn!(
                        "Cannot determine backend role ({}), retrying in {:?}",
                        e, delay
                    );

                    tokio::select! {
                        biased;
                        reason = self.shutdown_receiver.recv() => {
                            info!("Shutdown requested during role check: {:?}", reason);
                            self.terminate().await;
                            return RoleOutcome::ShutDown;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Start every component that is not alive.
    ///
    /// With `restart`, a component that ran before is joined first so its
    /// finished run is reaped.
    pub async fn start_components(&mut self, restart: bool) {
        for component in [self.processor.as_deref_mut(), self.listener.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            if component.is_alive() {
                continue;
            }
            if restart && component.id().is_some() {
                component.join().await;
            }
            component.start().await;
        }
    }

    /// Stop every component that was started and is still alive.
    pub async fn stop_components(&mut self) {
        for component in [self.listener.as_deref_mut(), self.processor.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            if component.id().is_some() && component.is_alive() {
                info!("Stopping {}", component.name());
                component.terminate().await;
            }
        }
    }

    /// React to a component exiting without being asked to.
    ///
    /// Notices queued behind this one are coalesced into the same pass. A
    /// reported failure triggers a role check; a silent exit restarts both
    /// components in place.
    pub async fn handle_worker_exit(&mut self, exit: WorkerExit) {
        if !self.should_run {
            debug!("Ignoring exit of {} during shutdown", exit.component);
            return;
        }

        let mut coalesced = 0;
        while self.exits.try_recv().is_ok() {
            coalesced += 1;
        }
        info!(
            "{} exited (run {}), {} further notices coalesced",
            exit.component,
            exit.run_id.get(),
            coalesced
        );

        let reports = match self.processor.as_deref() {
            Some(processor) => processor.error_channel().drain(),
            None => Vec::new(),
        };

        if reports.is_empty() {
            warn!("Component exited without reporting, restarting components");
            self.start_components(true).await;
            return;
        }

        for report in &reports {
            if report.classification.expected {
                warn!(
                    "{} terminated on an expected failure",
                    report.component
                );
            } else {
                error!(
                    "{} terminated on an unexpected failure",
                    report.component
                );
            }
        }
        if reports.iter().any(|report| report.classification.is_terminal()) {
            self.execute_role_based_procedure().await;
        }
    }

    /// Reconcile when a marker file changed; ignore every other change.
    pub async fn on_file_change(&mut self, change: FileChange) {
        let Some(target) = &self.watch else {
            return;
        };
        if !is_marker(&change.path, &target.markers) {
            debug!("Ignoring change to {}", change.path.display());
            return;
        }
        warn!(
            "Marker file {} changed, checking backend role",
            change.path.display()
        );
        self.execute_role_based_procedure().await;
    }
}
