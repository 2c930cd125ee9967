//! PostgreSQL backends built on sqlx.
//!
//! Role is read from `pg_is_in_recovery()`; notifications come from
//! `LISTEN`/`NOTIFY` through [`PgListener`].

use super::{ExternalNotification, PubSub, RoleDetector};
use crate::error::{BackendError, WorkerError};
use async_trait::async_trait;
use futures::FutureExt;
use sqlx::postgres::{PgListener, PgNotification, PgPool, PgPoolOptions};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

impl From<sqlx::Error> for BackendError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BackendError::Unreachable(error.to_string()),
            other => BackendError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for WorkerError {
    fn from(error: sqlx::Error) -> Self {
        BackendError::from(error).into()
    }
}

/// Build a pool that connects on first use, so an unreachable server does not
/// prevent the supervisor from starting.
pub fn lazy_pool(url: &str) -> Result<PgPool, BackendError> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(url)
        .map_err(BackendError::from)
}

/// Asks the server whether it is in recovery; a server that is not is primary.
#[derive(Debug, Clone)]
pub struct PgRoleDetector {
    pool: PgPool,
}

impl PgRoleDetector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleDetector for PgRoleDetector {
    async fn is_primary(&self) -> Result<bool, BackendError> {
        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&self.pool)
            .await?;
        Ok(!in_recovery)
    }
}

/// `LISTEN`/`NOTIFY` connection.
pub struct PgPubSub {
    pool: PgPool,
    listener: Option<PgListener>,
    buffered: VecDeque<ExternalNotification>,
}

impl PgPubSub {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            listener: None,
            buffered: VecDeque::new(),
        }
    }

    fn listener(&mut self) -> Result<&mut PgListener, WorkerError> {
        self.listener
            .as_mut()
            .ok_or_else(|| WorkerError::interface_destroyed("listener not connected"))
    }

    fn convert(notification: PgNotification) -> ExternalNotification {
        ExternalNotification::new(notification.channel(), notification.payload())
    }
}

#[async_trait]
impl PubSub for PgPubSub {
    async fn subscribe(&mut self, channel: &str) -> Result<(), WorkerError> {
        if self.listener.is_none() {
            info!("Connecting notification listener to database");
            self.listener = Some(PgListener::connect_with(&self.pool).await?);
        }
        self.listener()?.listen(channel).await?;
        debug!("Listening on channel '{}'", channel);
        Ok(())
    }

    async fn wait_pending(&mut self) -> Result<(), WorkerError> {
        if !self.buffered.is_empty() {
            return Ok(());
        }
        // try_recv yields None when the connection was lost.
        match self.listener()?.try_recv().await? {
            Some(notification) => {
                self.buffered.push_back(Self::convert(notification));
                Ok(())
            }
            None => Err(WorkerError::interface_destroyed(
                "notification connection lost",
            )),
        }
    }

    async fn drain_pending(&mut self) -> Result<Vec<ExternalNotification>, WorkerError> {
        let mut drained: Vec<_> = self.buffered.drain(..).collect();
        let listener = self.listener()?;
        while let Some(received) = listener.try_recv().now_or_never() {
            match received? {
                Some(notification) => drained.push(Self::convert(notification)),
                None => {
                    return Err(WorkerError::interface_destroyed(
                        "notification connection lost",
                    ))
                }
            }
        }
        Ok(drained)
    }

    async fn disconnect(&mut self) {
        self.buffered.clear();
        if let Some(listener) = self.listener.take() {
            info!("Disconnecting notification listener");
            drop(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_unreachable() {
        assert!(matches!(
            BackendError::from(sqlx::Error::PoolTimedOut),
            BackendError::Unreachable(_)
        ));
        assert!(matches!(
            WorkerError::from(sqlx::Error::PoolClosed),
            WorkerError::InterfaceDestroyed(_)
        ));
    }

    #[test]
    fn test_other_errors_are_query_failures() {
        assert!(matches!(
            BackendError::from(sqlx::Error::RowNotFound),
            BackendError::Query(_)
        ));
        assert!(matches!(
            WorkerError::from(sqlx::Error::RowNotFound),
            WorkerError::Backend(_)
        ));
    }

    #[tokio::test]
    async fn test_unconnected_pubsub_reports_destroyed_interface() {
        let pool = lazy_pool("postgres://localhost/rolewarden").unwrap();
        let mut pubsub = PgPubSub::new(pool);

        assert!(matches!(
            pubsub.wait_pending().await,
            Err(WorkerError::InterfaceDestroyed(_))
        ));
        pubsub.disconnect().await;
    }
}
