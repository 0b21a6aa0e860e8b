//! File-backed log store shared between processes.
//!
//! Every file access for one store path goes through the same
//! [`LockManager`] key. Writers reload before appending and rewrite the whole
//! file, which keeps in-process writers from losing each other's entries.
//! Two processes writing at the same instant can still drop one append; the
//! file only guards against torn reads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};

use crate::codec::StoreCodec;
use crate::config::StoreConfig;
use crate::lock_manager::LockManager;
use crate::log_index::LogIndex;
use crate::types::{default_hypotheses, Hypothesis, HypothesisStatus, LogEntry};
use crate::watcher::{ChangeWatcher, ChangeWatcherHandle, WatcherConfig};
use crate::LogStoreError;

/// Whether a query may answer from memory or must reload the file first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Current in-memory state; fresh only if a watcher keeps it in sync.
    Local,
    /// Reload from disk under the store lock, then answer.
    #[default]
    Authoritative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogStoreEvent {
    LogAdded(LogEntry),
    LogsUpdated(Vec<LogEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type LogStoreListener = Arc<dyn Fn(&LogStoreEvent) + Send + Sync>;

pub struct LogStore {
    path: PathBuf,
    lock_key: String,
    capacity: usize,
    codec: StoreCodec,
    locks: Arc<LockManager>,
    state: RwLock<LogIndex>,
    hypotheses: RwLock<Vec<Hypothesis>>,
    listeners: Mutex<Vec<(SubscriptionId, LogStoreListener)>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("format", &self.codec.format())
            .field("entries", &self.count())
            .finish()
    }
}

impl LogStore {
    /// Builds an empty store; call [`LogStore::reload`] (or use
    /// [`LogStore::open`]) to pick up what is already on disk.
    pub fn new(
        path: impl Into<PathBuf>,
        capacity: usize,
        codec: StoreCodec,
        locks: Arc<LockManager>,
    ) -> Result<Self, LogStoreError> {
        if capacity == 0 {
            return Err(LogStoreError::InvalidCapacity);
        }
        let path = path.into();
        Ok(Self {
            lock_key: path.display().to_string(),
            path,
            capacity,
            codec,
            locks,
            state: RwLock::new(LogIndex::default()),
            hypotheses: RwLock::new(default_hypotheses()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Builds a store from `config` and loads the existing file.
    pub async fn open(config: &StoreConfig, locks: Arc<LockManager>) -> Result<Self, LogStoreError> {
        let store = Self::new(
            config.store_path.clone(),
            config.max_logs,
            config.codec()?,
            locks,
        )?;
        let loaded = store.reload().await.len();
        tracing::debug!(
            store = %store.path.display(),
            entries = loaded,
            capacity = store.capacity,
            "log store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Reload, append, evict and persist as one critical section, then
    /// notify `LogAdded`. On a persist error the entry stays in memory but
    /// no event is sent.
    pub async fn add(&self, entry: LogEntry) -> Result<(), LogStoreError> {
        self.locks
            .run(self.lock_key.as_str(), || async {
                let on_disk = self.codec.read(&self.path).await;
                let snapshot = {
                    let mut state = write_or_recover(&self.state);
                    *state = LogIndex::capped(on_disk, self.capacity);
                    state.push(entry.clone());
                    let evicted = state.enforce_capacity(self.capacity);
                    if evicted > 0 {
                        tracing::debug!(
                            store = %self.path.display(),
                            evicted,
                            capacity = self.capacity,
                            "evicted oldest log entries"
                        );
                    }
                    state.entries().to_vec()
                };
                self.codec.write(&self.path, &snapshot).await
            })
            .await?;
        self.notify(&LogStoreEvent::LogAdded(entry));
        Ok(())
    }

    /// Replaces memory with the file's contents (capped) and returns them.
    pub async fn reload(&self) -> Vec<LogEntry> {
        self.locks
            .run(self.lock_key.as_str(), || async {
                let on_disk = self.codec.read(&self.path).await;
                let mut state = write_or_recover(&self.state);
                *state = LogIndex::capped(on_disk, self.capacity);
                state.entries().to_vec()
            })
            .await
    }

    pub fn query_local(&self) -> Vec<LogEntry> {
        read_or_recover(&self.state).entries().to_vec()
    }

    pub async fn query_authoritative(&self) -> Vec<LogEntry> {
        self.reload().await
    }

    pub async fn query(&self, mode: ReadMode) -> Vec<LogEntry> {
        match mode {
            ReadMode::Local => self.query_local(),
            ReadMode::Authoritative => self.query_authoritative().await,
        }
    }

    pub async fn query_by_source(&self, source_id: &str, mode: ReadMode) -> Vec<LogEntry> {
        self.refresh_for(mode).await;
        read_or_recover(&self.state).by_source(source_id)
    }

    /// Entries with `start <= timestamp <= end`, ordered by timestamp.
    pub async fn query_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mode: ReadMode,
    ) -> Vec<LogEntry> {
        if start > end {
            return Vec::new();
        }
        self.refresh_for(mode).await;
        read_or_recover(&self.state).in_range(start.timestamp_millis(), end.timestamp_millis())
    }

    /// In-memory size; never touches the file.
    pub fn count(&self) -> usize {
        read_or_recover(&self.state).len()
    }

    /// Empties memory, resets every hypothesis to pending and persists `[]`.
    pub async fn clear(&self) -> Result<(), LogStoreError> {
        self.locks
            .run(self.lock_key.as_str(), || async {
                write_or_recover(&self.state).clear();
                {
                    let mut catalog = write_or_recover(&self.hypotheses);
                    for hypothesis in catalog.iter_mut() {
                        hypothesis.status = HypothesisStatus::Pending;
                    }
                }
                self.codec.write(&self.path, &[]).await
            })
            .await?;
        tracing::debug!(store = %self.path.display(), "log store cleared");
        Ok(())
    }

    pub fn hypotheses(&self) -> Vec<Hypothesis> {
        let mut catalog = read_or_recover(&self.hypotheses).clone();
        catalog.sort_by(|left, right| left.id.cmp(&right.id));
        catalog
    }

    pub fn hypothesis(&self, id: &str) -> Option<Hypothesis> {
        read_or_recover(&self.hypotheses)
            .iter()
            .find(|hypothesis| hypothesis.id == id)
            .cloned()
    }

    /// Returns `false` for ids outside the catalog.
    pub fn set_hypothesis_status(&self, id: &str, status: HypothesisStatus) -> bool {
        match write_or_recover(&self.hypotheses)
            .iter_mut()
            .find(|hypothesis| hypothesis.id == id)
        {
            Some(hypothesis) => {
                hypothesis.status = status;
                true
            }
            None => false,
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&LogStoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock_or_recover(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock_or_recover(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Watches this store's file and, after each settled burst of changes,
    /// reloads and emits `LogsUpdated`. The watcher holds only a weak
    /// reference, so it goes quiet once the store is dropped.
    pub fn start_watcher(
        self: &Arc<Self>,
        config: WatcherConfig,
    ) -> Result<ChangeWatcherHandle, LogStoreError> {
        let store: Weak<Self> = Arc::downgrade(self);
        ChangeWatcher::start(self.path.clone(), config, move || {
            let store = store.clone();
            async move {
                if let Some(store) = store.upgrade() {
                    store.reload_and_notify().await;
                }
            }
        })
    }

    pub(crate) async fn reload_and_notify(&self) {
        let entries = self.reload().await;
        tracing::debug!(
            store = %self.path.display(),
            entries = entries.len(),
            "log store refreshed from disk"
        );
        self.notify(&LogStoreEvent::LogsUpdated(entries));
    }

    async fn refresh_for(&self, mode: ReadMode) {
        if mode == ReadMode::Authoritative {
            self.reload().await;
        }
    }

    fn notify(&self, event: &LogStoreEvent) {
        // Snapshot first so listeners may (un)subscribe re-entrantly.
        let listeners: Vec<LogStoreListener> = lock_or_recover(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_or_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
