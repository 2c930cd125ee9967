use thiserror::Error;

/// Errors raised by the supervisor itself (configuration and orchestration).
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("System error: {message}")]
    System { message: String },
}

impl SupervisorError {
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Errors raised inside a worker's lifecycle hooks.
///
/// These never escape a component's run loop: every one of them is handed to
/// the bound [`ErrorStrategy`](crate::strategy::ErrorStrategy) for
/// classification.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The communication interface to the backend is gone (closed connection,
    /// dropped channel).
    #[error("Interface destroyed: {0}")]
    InterfaceDestroyed(String),

    /// The backend reported an error while serving a request.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A worker was started without an `execute` implementation.
    #[error("Worker must implement 'execute'")]
    NotImplemented,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn interface_destroyed<S: Into<String>>(message: S) -> Self {
        Self::InterfaceDestroyed(message.into())
    }

    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend(message.into())
    }
}

/// Errors raised by backend capabilities (role detection, pub/sub).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend query failed: {0}")]
    Query(String),
}

impl From<BackendError> for WorkerError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Unreachable(message) => WorkerError::InterfaceDestroyed(message),
            BackendError::Query(message) => WorkerError::Backend(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
