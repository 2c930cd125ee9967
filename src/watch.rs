//! Filesystem change notification for role-change marker files.

use crate::error::{Result, SupervisorError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Depth of the change event channel.
pub const CHANGE_CHANNEL_DEPTH: usize = 16;

/// Default scan period of [`PollingWatcher`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// An entry directly under the watched directory was created, modified or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
}

/// True when the base filename of `path` is one of `markers`.
pub fn is_marker(path: &Path, markers: &HashSet<String>) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| markers.contains(name))
        .unwrap_or(false)
}

/// Source of change events for a single, non-recursive directory.
#[async_trait]
pub trait DirectoryWatcher: Send {
    async fn start(&mut self, directory: &Path) -> Result<mpsc::Receiver<FileChange>>;

    /// Stop emitting events. Safe to call when not started.
    async fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

type Snapshot = HashMap<PathBuf, Fingerprint>;

async fn scan(directory: &Path) -> std::io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        // Entries can vanish between listing and stat.
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        snapshot.insert(
            entry.path(),
            Fingerprint {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            },
        );
    }
    Ok(snapshot)
}

fn diff(before: &Snapshot, after: &Snapshot) -> Vec<PathBuf> {
    let mut changed: Vec<PathBuf> = after
        .iter()
        .filter(|(path, fingerprint)| before.get(*path) != Some(*fingerprint))
        .map(|(path, _)| path.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|path| !after.contains_key(*path))
            .cloned(),
    );
    changed.sort();
    changed
}

/// Roll `path` in `current` back to its entry in `before` so the next scan
/// reports it again.
fn defer(before: &Snapshot, current: &mut Snapshot, path: PathBuf) {
    match before.get(&path) {
        Some(fingerprint) => {
            current.insert(path, *fingerprint);
        }
        None => {
            current.remove(&path);
        }
    }
}

/// Watches a directory by rescanning it on a fixed interval.
///
/// Changes that do not fit in the event channel stay unacknowledged and are
/// reported by a later scan.
pub struct PollingWatcher {
    interval: Duration,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Default for PollingWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollingWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            token: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DirectoryWatcher for PollingWatcher {
    async fn start(&mut self, directory: &Path) -> Result<mpsc::Receiver<FileChange>> {
        self.stop().await;

        let metadata = fs::metadata(directory).await?;
        if !metadata.is_dir() {
            return Err(SupervisorError::invalid_configuration(format!(
                "watch path {} is not a directory",
                directory.display()
            )));
        }
        let mut snapshot = scan(directory).await?;
        info!("Watching {} every {:?}", directory.display(), self.interval);

        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_DEPTH);
        let token = CancellationToken::new();
        let directory = directory.to_path_buf();
        let period = self.interval;
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let mut current = match scan(&directory).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Failed to scan {}: {}", directory.display(), e);
                        continue;
                    }
                };

                for path in diff(&snapshot, &current) {
                    debug!("Change detected: {}", path.display());
                    match tx.try_send(FileChange { path }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(change)) => {
                            debug!("Change channel full, deferring {}", change.path.display());
                            defer(&snapshot, &mut current, change.path);
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
                snapshot = current;
            }
            debug!("Polling watcher for {} stopped", directory.display());
        });

        self.token = Some(token);
        self.handle = Some(handle);
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Polling watcher task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn markers(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    async fn next_change(rx: &mut mpsc::Receiver<FileChange>) -> FileChange {
        timeout(WAIT, rx.recv())
            .await
            .expect("no change observed")
            .expect("watcher stopped")
    }

    #[test]
    fn test_is_marker_matches_base_name() {
        let set = markers(&["promote", "standby.signal"]);

        assert!(is_marker(Path::new("/var/run/db/promote"), &set));
        assert!(is_marker(Path::new("standby.signal"), &set));
        assert!(!is_marker(Path::new("/var/run/db/promote.tmp"), &set));
        assert!(!is_marker(Path::new("/promote/other"), &set));
        assert!(!is_marker(Path::new("/"), &set));
    }

    #[test]
    fn test_diff_reports_created_modified_and_removed() {
        let fingerprint = |len| Fingerprint {
            modified: None,
            len,
        };
        let before: Snapshot = [
            (PathBuf::from("a"), fingerprint(1)),
            (PathBuf::from("b"), fingerprint(1)),
            (PathBuf::from("c"), fingerprint(1)),
        ]
        .into_iter()
        .collect();
        let after: Snapshot = [
            (PathBuf::from("a"), fingerprint(1)),
            (PathBuf::from("b"), fingerprint(2)),
            (PathBuf::from("d"), fingerprint(1)),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            diff(&before, &after),
            vec![PathBuf::from("b"), PathBuf::from("c"), PathBuf::from("d")]
        );
        assert!(diff(&after, &after).is_empty());
    }

    #[tokio::test]
    async fn test_polling_watcher_reports_changes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("existing"), b"x").unwrap();

        let mut watcher = PollingWatcher::new(Duration::from_millis(20));
        let mut rx = watcher.start(dir.path()).await.unwrap();
        assert!(watcher.is_running());

        let marker = dir.path().join("promote");
        std::fs::write(&marker, b"1").unwrap();
        assert_eq!(next_change(&mut rx).await.path, marker);

        std::fs::write(&marker, b"longer").unwrap();
        assert_eq!(next_change(&mut rx).await.path, marker);

        std::fs::remove_file(&marker).unwrap();
        assert_eq!(next_change(&mut rx).await.path, marker);

        watcher.stop().await;
        assert!(!watcher.is_running());
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
    }

    #[test]
    fn test_deferred_paths_are_reported_again() {
        let fingerprint = |len| Fingerprint {
            modified: None,
            len,
        };
        let before: Snapshot = [
            (PathBuf::from("kept"), fingerprint(1)),
            (PathBuf::from("removed"), fingerprint(1)),
        ]
        .into_iter()
        .collect();
        let mut current: Snapshot = [
            (PathBuf::from("kept"), fingerprint(2)),
            (PathBuf::from("created"), fingerprint(1)),
        ]
        .into_iter()
        .collect();
        let after = current.clone();

        for path in diff(&before, &after) {
            defer(&before, &mut current, path);
        }

        assert_eq!(current, before);
        assert_eq!(diff(&current, &after), diff(&before, &after));
    }

    #[tokio::test]
    async fn test_burst_larger_than_channel_keeps_marker() {
        let dir = TempDir::new().unwrap();
        let mut watcher = PollingWatcher::new(Duration::from_millis(20));
        let mut rx = watcher.start(dir.path()).await.unwrap();

        let marker = dir.path().join("standby.signal");
        let mut expected: HashSet<PathBuf> = (0..CHANGE_CHANNEL_DEPTH + 4)
            .map(|i| dir.path().join(format!("base.{:02}", i)))
            .collect();
        for path in &expected {
            std::fs::write(path, b"x").unwrap();
        }
        std::fs::write(&marker, b"").unwrap();
        expected.insert(marker.clone());

        let mut seen = HashSet::new();
        while seen.len() < expected.len() {
            seen.insert(next_change(&mut rx).await.path);
        }

        assert!(seen.contains(&marker));
        assert_eq!(seen, expected);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_subdirectory_contents_are_ignored() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();

        let mut watcher = PollingWatcher::new(Duration::from_millis(20));
        let mut rx = watcher.start(dir.path()).await.unwrap();

        std::fs::write(nested.join("promote"), b"1").unwrap();
        std::fs::write(dir.path().join("sentinel"), b"1").unwrap();

        let change = next_change(&mut rx).await;
        assert_ne!(change.path, nested.join("promote"));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_missing_directory_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let mut watcher = PollingWatcher::default();

        assert!(watcher.start(&dir.path().join("missing")).await.is_err());
        assert!(!watcher.is_running());
        watcher.stop().await;
    }
}
