use super::{Client, RoleOutcome};
use crate::error::{Result, SupervisorError};
use crate::messaging::{ShutdownReason, ShutdownSender};
use crate::os_signals::spawn_signal_forwarder;
use crate::watch::FileChange;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handle to a client running on its own task.
///
/// Any number of contexts may hold the shutdown sender; the client itself is
/// owned by its run loop.
#[derive(Debug)]
pub struct ClientHandle {
    shutdown: ShutdownSender,
    task: JoinHandle<Result<()>>,
}

impl ClientHandle {
    /// Ask the client to shut down. Returns false when a request is already pending.
    pub fn request_shutdown(&self) -> bool {
        self.shutdown.request(ShutdownReason::UserRequest)
    }

    pub fn shutdown_sender(&self) -> ShutdownSender {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run loop to finish.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| {
            error!("Client task failed: {}", e);
            SupervisorError::system(format!("client task failed: {}", e))
        })?
    }
}

async fn next_change(changes: &mut Option<mpsc::Receiver<FileChange>>) -> Option<FileChange> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Client {
    /// Validate, start the filesystem watch, install signal handlers and
    /// launch [`Client::run`] on its own task.
    pub async fn start(mut self) -> Result<ClientHandle> {
        self.validate()?;
        self.start_services().await?;

        let shutdown = self.shutdown_sender.clone();
        let task = tokio::spawn(async move {
            let mut client = self;
            client.run().await
        });

        Ok(ClientHandle { shutdown, task })
    }

    /// Start the filesystem watch, then the signal forwarder. Nothing is left
    /// running when either fails.
    pub(super) async fn start_services(&mut self) -> Result<()> {
        if let Some(target) = &self.watch {
            self.changes = Some(self.watcher.start(&target.path).await?);
        } else {
            info!("No watch path configured, file monitoring disabled");
        }

        if self.install_signal_handlers {
            match spawn_signal_forwarder(self.shutdown_sender.clone()) {
                Ok(task) => self.signal_task = Some(task),
                Err(e) => {
                    error!("Failed to install signal handlers: {}", e);
                    if self.changes.take().is_some() {
                        self.watcher.stop().await;
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Reconcile once, then serve shutdown requests, worker exits and file
    /// changes until shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.validate()?;
        self.should_run = true;
        info!("Client is running");

        if self.execute_role_based_procedure().await == RoleOutcome::ShutDown {
            return Ok(());
        }

        while self.should_run {
            tokio::select! {
                biased;
                reason = self.shutdown_receiver.recv() => {
                    info!("Shutdown initiated: {:?}", reason);
                    self.terminate().await;
                }
                Some(exit) = self.exits.recv() => {
                    self.handle_worker_exit(exit).await;
                }
                Some(change) = next_change(&mut self.changes) => {
                    self.on_file_change(change).await;
                }
            }
        }

        info!("Client shutdown complete");
        Ok(())
    }
}
