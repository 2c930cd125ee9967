use crate::messaging::RunId;
use std::time::Duration;

/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Constructed, or stopped and joined.
    Idle,
    Running,
    /// Sleeping after a transient failure.
    Backoff,
    /// Leaving the run loop, tear-down in progress.
    Terminating,
    Terminated,
}

/// Snapshot of a component published over its status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStatus {
    pub state: ComponentState,
    /// Current backoff delay, zero after a clean iteration.
    pub backoff: Duration,
    pub run_id: Option<RunId>,
}

impl Default for ComponentStatus {
    fn default() -> Self {
        Self {
            state: ComponentState::Idle,
            backoff: Duration::ZERO,
            run_id: None,
        }
    }
}
