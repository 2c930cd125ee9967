//! Bounded channels connecting the client and its workers.
//!
//! Every producer in this module uses `try_send`: a full channel means the
//! message is already represented downstream, so it is dropped instead of
//! blocking the sender.

use crate::error::WorkerError;
use crate::strategy::Classification;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Depth of a notification queue unless configured otherwise.
pub const DEFAULT_NOTIFICATION_DEPTH: usize = 1;

/// Depth of the shared error channel: one slot per worker of the pair.
pub const DEFAULT_ERROR_DEPTH: usize = 2;

/// Depth of the channel carrying worker exit notices to the client.
pub const EXIT_NOTICE_DEPTH: usize = 4;

/// A wake-up telling a worker that work is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification;

/// Create a bounded notification queue.
pub fn notification_channel(depth: usize) -> (Notifier, Inbox) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (Notifier { tx }, Inbox { rx })
}

/// Producer side of a notification queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Push a wake-up without blocking. Returns false when it was dropped.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(Notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Notification queue full, work already pending");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Notification queue closed, dropping wake-up");
                false
            }
        }
    }
}

/// Consumer side of a notification queue; the wait point of a processor.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Notification>,
}

impl Inbox {
    /// Wait for the next wake-up.
    ///
    /// Fails with [`WorkerError::InterfaceDestroyed`] once every notifier is gone.
    pub async fn recv(&mut self) -> Result<Notification, WorkerError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| WorkerError::interface_destroyed("notification queue closed"))
    }

    /// Take a pending wake-up, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Drop every pending wake-up and return how many were discarded.
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.rx.try_recv().is_ok() {
            cleared += 1;
        }
        cleared
    }
}

/// A terminal classification reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub component: String,
    pub classification: Classification,
}

/// Error channel shared by the listener and the processor.
///
/// Clones refer to the same underlying channel; [`ErrorChannel::same_channel`]
/// tells whether two handles are the same instance.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    tx: mpsc::Sender<ErrorReport>,
    rx: Arc<Mutex<mpsc::Receiver<ErrorReport>>>,
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_DEPTH)
    }
}

impl ErrorChannel {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Publish a report without blocking. Returns false when it was dropped.
    pub fn publish(&self, report: ErrorReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(report)) | Err(TrySendError::Closed(report)) => {
                debug!(
                    "Error channel full, dropping report from {}",
                    report.component
                );
                false
            }
        }
    }

    /// Take the oldest pending report, if any.
    pub fn try_take(&self) -> Option<ErrorReport> {
        self.rx.lock().try_recv().ok()
    }

    /// Take every pending report.
    pub fn drain(&self) -> Vec<ErrorReport> {
        let mut rx = self.rx.lock();
        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        reports
    }

    pub fn same_channel(&self, other: &ErrorChannel) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Identity of a single run of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    pub(crate) fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Sent to the client whenever a worker exits without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub component: String,
    pub run_id: RunId,
}

/// Producer side of the worker exit channel.
#[derive(Debug, Clone)]
pub struct ExitNotifier {
    tx: mpsc::Sender<WorkerExit>,
}

impl ExitNotifier {
    pub fn notify(&self, exit: WorkerExit) -> bool {
        self.tx.try_send(exit).is_ok()
    }
}

pub fn exit_notice_channel() -> (ExitNotifier, mpsc::Receiver<WorkerExit>) {
    let (tx, rx) = mpsc::channel(EXIT_NOTICE_DEPTH);
    (ExitNotifier { tx }, rx)
}

/// Why the client is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    UserRequest,
}

/// Single-slot channel carrying shutdown requests to the client's run loop.
pub fn shutdown_channel() -> (ShutdownSender, mpsc::Receiver<ShutdownReason>) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownSender { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct ShutdownSender {
    tx: mpsc::Sender<ShutdownReason>,
}

impl ShutdownSender {
    /// Request a shutdown. A request already waiting in the slot is enough,
    /// so a second one is dropped.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Shutdown already requested");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// True once the client stopped listening for requests.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
