//! Worker turning backend notifications into wake-ups for a processor.

use crate::backend::PubSub;
use crate::component::Worker;
use crate::error::WorkerError;
use crate::messaging::Notifier;
use async_trait::async_trait;
use tracing::{debug, trace};

/// Listens on one pub/sub channel and forwards every notification downstream.
pub struct NotificationListener<S: PubSub> {
    source: S,
    channel: String,
    downstream: Notifier,
    fire_on_start: bool,
}

impl<S: PubSub> NotificationListener<S> {
    pub fn new<C: Into<String>>(source: S, channel: C, downstream: Notifier) -> Self {
        Self {
            source,
            channel: channel.into(),
            downstream,
            fire_on_start: true,
        }
    }

    /// Whether to wake the processor once right after subscribing, so work
    /// queued while nobody listened is picked up.
    pub fn with_fire_on_start(mut self, fire_on_start: bool) -> Self {
        self.fire_on_start = fire_on_start;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn fire_on_start(&self) -> bool {
        self.fire_on_start
    }
}

#[async_trait]
impl<S: PubSub> Worker for NotificationListener<S> {
    type Output = usize;

    async fn reset(&mut self) {
        self.source.disconnect().await;
    }

    async fn set_up(&mut self) -> Result<(), WorkerError> {
        self.source.subscribe(&self.channel).await?;
        if self.fire_on_start {
            debug!("Sending start-up notification for '{}'", self.channel);
            self.downstream.notify();
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), WorkerError> {
        self.source.wait_pending().await
    }

    async fn execute(&mut self) -> Result<usize, WorkerError> {
        let pending = self.source.drain_pending().await?;
        let mut forwarded = 0;
        for notification in &pending {
            trace!(
                "Notification on '{}': {}",
                notification.channel,
                notification.payload
            );
            if self.downstream.notify() {
                forwarded += 1;
            }
        }
        debug!(
            "Drained {} notifications, forwarded {}",
            pending.len(),
            forwarded
        );
        Ok(forwarded)
    }

    async fn tear_down(&mut self) -> Result<(), WorkerError> {
        self.source.disconnect().await;
        Ok(())
    }
}
