//! The supervisor of a listener/processor pair.
//!
//! A [`Client`] keeps both components running while the backend is primary
//! and stopped while it is standby. It reconciles on start, on marker file
//! changes and whenever a component exits without being asked to.

mod failover;
mod orchestrator;
mod runtime;
mod shutdown;


pub use failover::RoleOutcome;
pub use orchestrator::{Client, WatchTarget};
pub use runtime::ClientHandle;
