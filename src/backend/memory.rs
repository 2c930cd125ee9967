//! In-process backends for running the supervisor without a database.

use super::{ExternalNotification, PubSub, RoleDetector};
use crate::error::{BackendError, WorkerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct PubSubState {
    connected: bool,
    severed: bool,
    subscriptions: HashSet<String>,
    pending: VecDeque<ExternalNotification>,
    connects: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PubSubState>,
    notify: Notify,
}

/// Pub/sub connection backed by process memory.
///
/// Notifications published through a [`PubSubHandle`] reach the connection
/// only while it is connected and subscribed to their channel.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    shared: Arc<Shared>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle used to publish and to inspect the connection from outside.
    pub fn handle(&self) -> PubSubHandle {
        PubSubHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn destroyed() -> WorkerError {
        WorkerError::interface_destroyed("connection severed")
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn subscribe(&mut self, channel: &str) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock();
        if state.severed {
            return Err(Self::destroyed());
        }
        if !state.connected {
            state.connected = true;
            state.connects += 1;
        }
        state.subscriptions.insert(channel.to_string());
        debug!("Memory pub/sub subscribed to '{}'", channel);
        Ok(())
    }

    async fn wait_pending(&mut self) -> Result<(), WorkerError> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let state = self.shared.state.lock();
                if state.severed {
                    return Err(Self::destroyed());
                }
                if !state.pending.is_empty() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    async fn drain_pending(&mut self) -> Result<Vec<ExternalNotification>, WorkerError> {
        let mut state = self.shared.state.lock();
        if state.severed {
            return Err(Self::destroyed());
        }
        Ok(state.pending.drain(..).collect())
    }

    async fn disconnect(&mut self) {
        let mut state = self.shared.state.lock();
        state.connected = false;
        state.subscriptions.clear();
        state.pending.clear();
    }
}

/// External side of a [`MemoryPubSub`].
#[derive(Debug, Clone)]
pub struct PubSubHandle {
    shared: Arc<Shared>,
}

impl PubSubHandle {
    /// Publish a notification. Returns false when nobody is listening on the channel.
    pub fn publish(&self, channel: &str, payload: &str) -> bool {
        let mut state = self.shared.state.lock();
        if !state.connected || !state.subscriptions.contains(channel) {
            return false;
        }
        state
            .pending
            .push_back(ExternalNotification::new(channel, payload));
        drop(state);
        self.shared.notify.notify_one();
        true
    }

    /// Simulate the server dropping the connection.
    pub fn sever(&self) {
        self.shared.state.lock().severed = true;
        self.shared.notify.notify_one();
    }

    /// Allow connections again after [`PubSubHandle::sever`].
    pub fn restore(&self) {
        self.shared.state.lock().severed = false;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.shared.state.lock().subscriptions.contains(channel)
    }

    /// Number of times the connection was (re)established.
    pub fn connects(&self) -> usize {
        self.shared.state.lock().connects
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

/// Role detector answering from a script, then from a settable default.
///
/// Every call is timestamped with [`tokio::time::Instant`] so tests running on
/// a paused clock can inspect the delays between checks.
#[derive(Debug)]
pub struct ScriptedRoleDetector {
    primary: Mutex<bool>,
    script: Mutex<VecDeque<Result<bool, BackendError>>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedRoleDetector {
    pub fn new(primary: bool) -> Self {
        Self {
            primary: Mutex::new(primary),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue an answer consumed before the default applies.
    pub fn push_response(&self, response: Result<bool, BackendError>) {
        self.script.lock().push_back(response);
    }

    /// Queue `count` unreachable answers.
    pub fn push_unreachable(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Err(BackendError::Unreachable(
                "connection refused".to_string(),
            )));
        }
    }

    pub fn set_primary(&self, primary: bool) {
        *self.primary.lock() = primary;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RoleDetector for ScriptedRoleDetector {
    async fn is_primary(&self) -> Result<bool, BackendError> {
        self.calls.lock().push(Instant::now());
        if let Some(response) = self.script.lock().pop_front() {
            return response;
        }
        Ok(*self.primary.lock())
    }
}
