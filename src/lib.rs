pub mod backend;
pub mod backoff;
pub mod client;
pub mod component;
pub mod config;
pub mod error;
pub mod listener;
pub mod messaging;
pub mod os_signals;
pub mod processor;
pub mod strategy;
pub mod watch;

pub use backend::{ExternalNotification, MemoryPubSub, PubSub, RoleDetector, ScriptedRoleDetector};
#[cfg(feature = "postgres")]
pub use backend::{PgPubSub, PgRoleDetector};
pub use backoff::Backoff;
pub use client::{Client, ClientHandle, RoleOutcome, WatchTarget};
pub use component::{Component, ComponentState, ComponentStatus, Supervised, Worker};
pub use config::SupervisorConfig;
pub use error::{BackendError, Result, SupervisorError, WorkerError};
pub use listener::NotificationListener;
pub use messaging::{notification_channel, ErrorChannel, Inbox, Notifier, ShutdownReason};
pub use processor::FnProcessor;
pub use strategy::{Classification, CommonErrorStrategy, ErrorAction, ErrorStrategy};
pub use watch::{DirectoryWatcher, FileChange, PollingWatcher};
