use crate::error::WorkerError;
use std::fmt;
use tracing::error;

/// What a component does after a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorAction {
    /// Discard the failure and wait for the next notification.
    Continue,
    /// Sleep for the next backoff interval, then wait again.
    Backoff,
    /// Report the failure on the error channel and exit the worker.
    Terminate,
}

impl fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorAction::Continue => write!(f, "continue"),
            ErrorAction::Backoff => write!(f, "backoff"),
            ErrorAction::Terminate => write!(f, "terminate"),
        }
    }
}

/// Outcome of classifying a worker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Classification {
    /// Whether the failure belongs to a known category.
    pub expected: bool,
    pub action: ErrorAction,
}

impl Classification {
    pub const fn new(expected: bool, action: ErrorAction) -> Self {
        Self { expected, action }
    }

    pub const fn expected(action: ErrorAction) -> Self {
        Self::new(true, action)
    }

    pub const fn unexpected() -> Self {
        Self::new(false, ErrorAction::Terminate)
    }

    /// True when the worker should stop and the pair be reconciled.
    pub fn is_terminal(&self) -> bool {
        self.action == ErrorAction::Terminate
    }
}

/// Policy deciding how a component reacts to a failed iteration.
pub trait ErrorStrategy: Send + Sync {
    fn classify(&self, error: &WorkerError) -> Classification;
}

impl<F> ErrorStrategy for F
where
    F: Fn(&WorkerError) -> Classification + Send + Sync,
{
    fn classify(&self, error: &WorkerError) -> Classification {
        self(error)
    }
}

/// Backend messages that indicate a transient condition worth retrying.
pub const DEFAULT_TRANSIENT_MESSAGES: &[&str] = &[
    "could not serialize access",
    "deadlock detected",
    "canceling statement due to conflict with recovery",
    "the database system is starting up",
    "too many connections",
];

/// Reference classification policy.
///
/// - a destroyed interface is expected and terminal,
/// - a backend error is retried with backoff when its message matches a known
///   transient condition and is terminal otherwise,
/// - anything else is unexpected and terminal.
#[derive(Debug, Clone)]
pub struct CommonErrorStrategy {
    transient_messages: Vec<String>,
}

impl Default for CommonErrorStrategy {
    fn default() -> Self {
        Self::with_transient_messages(DEFAULT_TRANSIENT_MESSAGES.iter().copied())
    }
}

impl CommonErrorStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a strategy that treats the given substrings as transient.
    pub fn with_transient_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient_messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn transient_messages(&self) -> &[String] {
        &self.transient_messages
    }

    fn is_transient(&self, message: &str) -> bool {
        self.transient_messages
            .iter()
            .any(|needle| message.contains(needle.as_str()))
    }
}

impl ErrorStrategy for CommonErrorStrategy {
    fn classify(&self, error: &WorkerError) -> Classification {
        match error {
            WorkerError::InterfaceDestroyed(_) => Classification::expected(ErrorAction::Terminate),
            WorkerError::Backend(message) if self.is_transient(message) => {
                Classification::expected(ErrorAction::Backoff)
            }
            WorkerError::Backend(_) => Classification::expected(ErrorAction::Terminate),
            other => {
                error!("Unexpected worker error: {}", other);
                Classification::unexpected()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_destroyed_is_expected_terminate() {
        let strategy = CommonErrorStrategy::new();
        let result = strategy.classify(&WorkerError::interface_destroyed("connection closed"));
        assert_eq!(result, Classification::new(true, ErrorAction::Terminate));
    }

    #[test]
    fn test_transient_backend_error_backs_off() {
        let strategy = CommonErrorStrategy::new();
        for message in DEFAULT_TRANSIENT_MESSAGES {
            let error = WorkerError::backend(format!("ERROR: {} (SQLSTATE 40001)", message));
            assert_eq!(
                strategy.classify(&error),
                Classification::new(true, ErrorAction::Backoff),
                "message '{}' should be transient",
                message
            );
        }
    }

    #[test]
    fn test_other_backend_error_terminates() {
        let strategy = CommonErrorStrategy::new();
        let error = WorkerError::backend("relation \"jobs\" does not exist");
        assert_eq!(
            strategy.classify(&error),
            Classification::new(true, ErrorAction::Terminate)
        );
    }

    #[test]
    fn test_unrecognized_error_is_unexpected() {
        let strategy = CommonErrorStrategy::new();
        let error = WorkerError::Other(anyhow::anyhow!("index out of range"));
        assert_eq!(strategy.classify(&error), Classification::unexpected());
        assert_eq!(
            strategy.classify(&WorkerError::NotImplemented),
            Classification::new(false, ErrorAction::Terminate)
        );
    }

    #[test]
    fn test_custom_transient_messages() {
        let strategy = CommonErrorStrategy::with_transient_messages(["lock timeout"]);
        assert_eq!(
            strategy.classify(&WorkerError::backend("lock timeout after 5s")),
            Classification::expected(ErrorAction::Backoff)
        );
        assert_eq!(
            strategy.classify(&WorkerError::backend("deadlock detected")),
            Classification::expected(ErrorAction::Terminate)
        );
    }

    #[test]
    fn test_closure_strategy() {
        let strategy = |_: &WorkerError| Classification::expected(ErrorAction::Continue);
        assert_eq!(
            strategy.classify(&WorkerError::NotImplemented).action,
            ErrorAction::Continue
        );
    }
}
