//! Processor built from an inbox and an async closure.

use crate::component::Worker;
use crate::error::WorkerError;
use crate::messaging::Inbox;
use async_trait::async_trait;
use std::future::Future;

/// Runs `handler` once per wake-up received on its inbox.
///
/// ```ignore
/// let (notifier, inbox) = notification_channel(1);
/// let processor = FnProcessor::new(inbox, move || {
///     let pool = pool.clone();
///     async move { drain_jobs(&pool).await }
/// });
/// ```
pub struct FnProcessor<F> {
    inbox: Inbox,
    handler: F,
    executions: u64,
}

impl<F, Fut> FnProcessor<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send,
{
    pub fn new(inbox: Inbox, handler: F) -> Self {
        Self {
            inbox,
            handler,
            executions: 0,
        }
    }

    /// Number of completed executions across all runs.
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

#[async_trait]
impl<F, Fut> Worker for FnProcessor<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send,
{
    type Output = ();

    async fn wait(&mut self) -> Result<(), WorkerError> {
        self.inbox.recv().await.map(|_| ())
    }

    async fn execute(&mut self) -> Result<(), WorkerError> {
        (self.handler)().await
    }

    async fn post_execute(&mut self, _output: ()) -> Result<(), WorkerError> {
        self.executions += 1;
        Ok(())
    }
}
