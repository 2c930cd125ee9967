use super::Client;
use crate::messaging::ShutdownReason;
use tracing::{info, warn};

impl Client {
    /// Shut the client down in place.
    ///
    /// Marks the loop finished, stops both components, then stops the
    /// filesystem watch. Other contexts should use [`Client::request_shutdown`]
    /// or a [`ClientHandle`](super::ClientHandle) instead.
    pub async fn terminate(&mut self) {
        warn!("Shutting down...");
        self.should_run = false;
        self.stop_components().await;

        if self.changes.take().is_some() {
            self.watcher.stop().await;
            info!("Filesystem watch stopped");
        }
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
    }

    /// Queue a shutdown for the run loop. Dropped when one is already queued.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        self.shutdown_sender.request(reason)
    }
}
