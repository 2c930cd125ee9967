//! Termination signal handling.
//!
//! On Unix SIGINT, SIGTERM and SIGQUIT all count as a terminate request;
//! elsewhere only Ctrl-C does.

use crate::messaging::{ShutdownReason, ShutdownSender};
use tokio::task::JoinHandle;
use tracing::info;

/// Terminate signal streams, installed once and read repeatedly.
#[cfg(unix)]
pub struct ShutdownSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next terminate signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to wait for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        "CTRL-C"
    }
}

/// Forward every terminate signal to the client's shutdown slot.
///
/// The handlers are installed before this returns, so a signal delivered
/// between two forwards is still seen. Repeated signals land on the full slot
/// and are dropped.
pub fn spawn_signal_forwarder(shutdown: ShutdownSender) -> std::io::Result<JoinHandle<()>> {
    let mut signals = ShutdownSignals::install()?;
    Ok(tokio::spawn(async move {
        loop {
            let name = signals.recv().await;
            info!("Received {} signal", name);
            shutdown.request(ShutdownReason::Signal(name.to_string()));
            if shutdown.is_closed() {
                return;
            }
        }
    }))
}
