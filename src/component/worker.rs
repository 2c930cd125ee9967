use crate::error::WorkerError;
use async_trait::async_trait;

/// Lifecycle hooks of a supervised worker.
///
/// A [`Component`](super::Component) drives these hooks from its run loop:
///
/// ```text
/// reset ─► set_up ─► loop { wait ─► pre_execute ─► execute ─► post_execute } ─► tear_down
/// ```
///
/// Only `wait` and `execute` carry meaning for every worker; the default
/// `execute` fails with [`WorkerError::NotImplemented`], which the reference
/// strategy treats as an unexpected, terminal error.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Value handed from `execute` to `post_execute`.
    type Output: Send;

    /// Return the owned resource to a disconnected state. Called before every start.
    async fn reset(&mut self) {}

    /// Called once per start, before the first wait.
    async fn set_up(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Suspend until a notification is ready. The only blocking point of the loop.
    async fn wait(&mut self) -> Result<(), WorkerError>;

    async fn pre_execute(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn execute(&mut self) -> Result<Self::Output, WorkerError> {
        Err(WorkerError::NotImplemented)
    }

    async fn post_execute(&mut self, _output: Self::Output) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Called on every exit path of the run loop.
    async fn tear_down(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }
}
