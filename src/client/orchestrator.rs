use crate::backend::RoleDetector;
use crate::backoff::ROLE_CHECK_CEILING_SECS;
use crate::component::Supervised;
use crate::error::{Result, SupervisorError};
use crate::messaging::{
    exit_notice_channel, shutdown_channel, ExitNotifier, ShutdownReason, ShutdownSender, WorkerExit,
};
use crate::watch::{DirectoryWatcher, FileChange, PollingWatcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Directory to watch and the file names that trigger a role check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub markers: HashSet<String>,
}

impl WatchTarget {
    pub fn new<P, I, S>(path: P, markers: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

/// Supervises one listener and one processor on behalf of the backend's role.
pub struct Client {
    pub(super) role: Arc<dyn RoleDetector>,
    pub(super) listener: Option<Box<dyn Supervised>>,
    pub(super) processor: Option<Box<dyn Supervised>>,
    pub(super) retry_ceiling: u64,

    // Filesystem watch
    pub(super) watch: Option<WatchTarget>,
    pub(super) watcher: Box<dyn DirectoryWatcher>,
    pub(super) changes: Option<mpsc::Receiver<FileChange>>,

    // Lifecycle management
    pub(super) should_run: bool,
    pub(super) exit_notifier: ExitNotifier,
    pub(super) exits: mpsc::Receiver<WorkerExit>,
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: mpsc::Receiver<ShutdownReason>,
    pub(super) install_signal_handlers: bool,
    pub(super) signal_task: Option<JoinHandle<()>>,
}

impl Client {
    pub fn new(role: Arc<dyn RoleDetector>) -> Self {
        let (exit_notifier, exits) = exit_notice_channel();
        let (shutdown_sender, shutdown_receiver) = shutdown_channel();
        Self {
            role,
            listener: None,
            processor: None,
            retry_ceiling: ROLE_CHECK_CEILING_SECS,
            watch: None,
            watcher: Box::new(PollingWatcher::default()),
            changes: None,
            should_run: false,
            exit_notifier,
            exits,
            shutdown_sender,
            shutdown_receiver,
            install_signal_handlers: true,
            signal_task: None,
        }
    }

    /// Ceiling, in seconds, of the role check retry backoff.
    pub fn with_retry_ceiling(mut self, ceiling: u64) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    /// Reconcile whenever one of `target.markers` changes under `target.path`.
    pub fn with_watch(mut self, target: WatchTarget) -> Self {
        self.watch = Some(target);
        self
    }

    pub fn with_watcher(mut self, watcher: Box<dyn DirectoryWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Whether [`Client::start`] installs SIGINT/SIGTERM/SIGQUIT handlers.
    pub fn with_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    /// Set the processor, replacing any previous one.
    pub fn add_processor<C: Supervised + 'static>(&mut self, mut processor: C) {
        processor.set_exit_notifier(self.exit_notifier.clone());
        debug!("Processor '{}' added", processor.name());
        self.processor = Some(Box::new(processor));
    }

    /// Set the listener, replacing any previous one.
    pub fn add_listener<C: Supervised + 'static>(&mut self, mut listener: C) {
        listener.set_exit_notifier(self.exit_notifier.clone());
        debug!("Listener '{}' added", listener.name());
        self.listener = Some(Box::new(listener));
    }

    /// Check that both components are present and report on one error channel.
    pub fn validate(&self) -> Result<()> {
        let processor = self
            .processor
            .as_ref()
            .ok_or_else(|| SupervisorError::invalid_configuration("A processor must be defined"))?;
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| SupervisorError::invalid_configuration("A listener must be defined"))?;

        if !processor
            .error_channel()
            .same_channel(listener.error_channel())
        {
            return Err(SupervisorError::invalid_configuration(
                "A processor and listener must share one error channel",
            ));
        }
        Ok(())
    }

    pub fn listener(&self) -> Option<&dyn Supervised> {
        self.listener.as_deref()
    }

    pub fn processor(&self) -> Option<&dyn Supervised> {
        self.processor.as_deref()
    }

    pub fn retry_ceiling(&self) -> u64 {
        self.retry_ceiling
    }

    pub fn watch_target(&self) -> Option<&WatchTarget> {
        self.watch.as_ref()
    }

    /// True between the start of [`Client::run`] and shutdown.
    pub fn is_running(&self) -> bool {
        self.should_run
    }

    /// Sender feeding the client's single-slot shutdown channel.
    pub fn shutdown_sender(&self) -> ShutdownSender {
        self.shutdown_sender.clone()
    }
}
