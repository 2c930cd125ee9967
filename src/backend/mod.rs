//! Capabilities the supervisor needs from the backend it follows.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::{BackendError, WorkerError};
use async_trait::async_trait;

pub use memory::{MemoryPubSub, PubSubHandle, ScriptedRoleDetector};

#[cfg(feature = "postgres")]
pub use postgres::{PgPubSub, PgRoleDetector};

/// Answers whether the backend is currently the primary.
///
/// Every call must consult the backend; the answer is never cached.
#[async_trait]
pub trait RoleDetector: Send + Sync {
    async fn is_primary(&self) -> Result<bool, BackendError>;
}

/// A notification delivered by the backend's pub/sub facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalNotification {
    pub channel: String,
    pub payload: String,
}

impl ExternalNotification {
    pub fn new<C: Into<String>, P: Into<String>>(channel: C, payload: P) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe connection consumed by the listener.
#[async_trait]
pub trait PubSub: Send + 'static {
    async fn subscribe(&mut self, channel: &str) -> Result<(), WorkerError>;

    /// Wait until at least one notification is pending.
    async fn wait_pending(&mut self) -> Result<(), WorkerError>;

    /// Take every notification pending right now. Never waits.
    async fn drain_pending(&mut self) -> Result<Vec<ExternalNotification>, WorkerError>;

    /// Close the connection. Safe to call when already disconnected.
    async fn disconnect(&mut self);
}
