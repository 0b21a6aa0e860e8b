//! Cross-process log store for RooTrace debugging sessions.
//!
//! A long-lived host process appends entries while short-lived query
//! processes read them back. The store file is the only shared medium:
//!
//! - [`LockManager`] serializes file access per path inside one process.
//! - [`StoreCodec`] reads and rewrites the whole file, optionally sealed by an
//!   [`EnvelopeCipher`].
//! - [`LogStore`] keeps an indexed in-memory mirror and notifies listeners.
//! - [`ChangeWatcher`] polls the file and drives debounced reloads.

use thiserror::Error;

pub mod codec;
pub mod config;
pub mod envelope;
pub mod export;
pub mod lock_manager;
mod log_index;
pub mod log_store;
pub mod types;
pub mod watcher;

pub use codec::{DecodeSource, DecodedStore, StoreCodec, StoreFormat};
pub use config::{ensure_gitignore_entry, store_path_for, StoreConfig, DEFAULT_MAX_LOGS};
pub use envelope::{AesGcmEnvelope, CipherError, EnvelopeCipher, EnvelopeKey};
pub use export::{export_logs, filter_entries, save_export, ExportFormat, ExportOptions};
pub use lock_manager::LockManager;
pub use log_store::{LogStore, LogStoreEvent, LogStoreListener, ReadMode, SubscriptionId};
pub use types::{default_hypotheses, Hypothesis, HypothesisStatus, LogEntry};
pub use watcher::{ChangeWatcher, ChangeWatcherHandle, WatcherConfig};

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("log store capacity must be at least 1")]
    InvalidCapacity,
    #[error("change watcher poll interval must be greater than zero")]
    InvalidPollInterval,
    #[error("change watcher requires an active Tokio runtime")]
    NoRuntime,
    #[error("failed to persist log store: {0:#}")]
    Persist(#[from] anyhow::Error),
    #[error("failed to serialize log entries: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}
