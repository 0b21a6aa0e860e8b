//! Polling mtime watcher with trailing-edge debounce.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::LogStoreError;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: Option<u64>,
}

impl FileStamp {
    fn observe(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(metadata) => Self {
                modified: metadata.modified().ok(),
                len: Some(metadata.len()),
            },
            Err(_) => Self {
                modified: None,
                len: None,
            },
        }
    }

    async fn observe_async(path: &Path) -> Self {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Self {
                modified: metadata.modified().ok(),
                len: Some(metadata.len()),
            },
            Err(_) => Self {
                modified: None,
                len: None,
            },
        }
    }
}

/// Starts watchers; see [`ChangeWatcher::start`].
#[derive(Debug)]
pub struct ChangeWatcher;

impl ChangeWatcher {
    /// Polls `path` every `config.poll_interval` and runs `on_change` once
    /// per burst of changes, after `config.debounce` of quiet. The file's
    /// state at call time is the baseline, so an untouched file never fires.
    pub fn start<F, Fut>(
        path: impl Into<PathBuf>,
        config: WatcherConfig,
        on_change: F,
    ) -> Result<ChangeWatcherHandle, LogStoreError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if config.poll_interval.is_zero() {
            return Err(LogStoreError::InvalidPollInterval);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LogStoreError::NoRuntime)?;

        let path = path.into();
        let baseline = FileStamp::observe(&path);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_path = path.clone();
        let task = runtime.spawn(async move {
            run_watch_loop(task_path, config, baseline, on_change, shutdown_rx).await;
        });
        tracing::debug!(
            store = %path.display(),
            poll_ms = config.poll_interval.as_millis() as u64,
            debounce_ms = config.debounce.as_millis() as u64,
            "change watcher started"
        );
        Ok(ChangeWatcherHandle {
            path,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Running watcher. Dropping the handle signals the task to stop; call
/// [`ChangeWatcherHandle::stop`] to also wait for it.
#[derive(Debug)]
pub struct ChangeWatcherHandle {
    path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeWatcherHandle {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Cancels polling and any pending debounce. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
            tracing::debug!(store = %self.path.display(), "change watcher stopped");
        }
    }
}

impl Drop for ChangeWatcherHandle {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

async fn run_watch_loop<F, Fut>(
    path: PathBuf,
    config: WatcherConfig,
    baseline: FileStamp,
    mut on_change: F,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_seen = baseline;
    let mut deadline: Option<Instant> = None;

    loop {
        let wake_at = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = interval.tick() => {
                let current = FileStamp::observe_async(&path).await;
                if current != last_seen {
                    last_seen = current;
                    deadline = Some(Instant::now() + config.debounce);
                    tracing::trace!(store = %path.display(), "store file change observed");
                }
            }
            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                deadline = None;
                tracing::debug!(store = %path.display(), "store file settled; notifying");
                on_change().await;
            }
        }
    }
}
