//! Store location, capacity, format and watcher settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rootrace_core::write_text_atomic;

use crate::codec::{StoreCodec, StoreFormat};
use crate::envelope::AesGcmEnvelope;
use crate::watcher::WatcherConfig;
use crate::LogStoreError;

pub const WORKSPACE_ENV: &str = "ROOTRACE_WORKSPACE";
pub const MAX_LOGS_ENV: &str = "ROOTRACE_MAX_LOGS";
pub const STORE_FORMAT_ENV: &str = "ROOTRACE_STORE_FORMAT";
pub const WATCH_INTERVAL_ENV: &str = "ROOTRACE_WATCH_INTERVAL_MS";
pub const WATCH_DEBOUNCE_ENV: &str = "ROOTRACE_WATCH_DEBOUNCE_MS";

pub const DEFAULT_MAX_LOGS: usize = 1000;
pub const STORE_DIR_NAME: &str = ".rootrace";
pub const STORE_FILE_NAME: &str = "ai_debug_logs.json";

/// `<root>/.rootrace/ai_debug_logs.json`.
pub fn store_path_for(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STORE_DIR_NAME).join(STORE_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub workspace_root: PathBuf,
    pub store_path: PathBuf,
    pub max_logs: usize,
    pub format: StoreFormat,
    pub watch: WatcherConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::for_workspace(".")
    }
}

impl StoreConfig {
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            store_path: store_path_for(&workspace_root),
            workspace_root,
            max_logs: DEFAULT_MAX_LOGS,
            format: StoreFormat::Plain,
            watch: WatcherConfig::default(),
        }
    }

    /// Reads the `ROOTRACE_*` variables; the workspace defaults to the
    /// current directory.
    pub fn from_env() -> Self {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_env_map(&env, &cwd)
    }

    /// Unset, blank or invalid values fall back to defaults.
    pub fn from_env_map(env: &BTreeMap<String, String>, default_root: &Path) -> Self {
        let workspace_root = env
            .get(WORKSPACE_ENV)
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_root.to_path_buf());
        let mut config = Self::for_workspace(workspace_root);

        config.max_logs = parse_positive(env, MAX_LOGS_ENV).unwrap_or(DEFAULT_MAX_LOGS);
        config.format = match env.get(STORE_FORMAT_ENV) {
            Some(raw) => StoreFormat::parse(raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown {STORE_FORMAT_ENV}; using plain");
                StoreFormat::Plain
            }),
            None => StoreFormat::Plain,
        };
        if let Some(interval_ms) = parse_positive::<u64>(env, WATCH_INTERVAL_ENV) {
            config.watch.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(debounce_ms) = parse_non_negative::<u64>(env, WATCH_DEBOUNCE_ENV) {
            config.watch.debounce = Duration::from_millis(debounce_ms);
        }
        config
    }

    /// Builds the codec for this deployment. Plain stores still open
    /// encrypted files when key material resolves.
    pub fn codec(&self) -> Result<StoreCodec, LogStoreError> {
        match (self.format, AesGcmEnvelope::from_env()) {
            (StoreFormat::Encrypted, Ok(cipher)) => Ok(StoreCodec::encrypted(Arc::new(cipher))),
            (StoreFormat::Encrypted, Err(error)) => Err(error.into()),
            (StoreFormat::Plain, Ok(cipher)) => Ok(StoreCodec::plain_with_decoder(Arc::new(cipher))),
            (StoreFormat::Plain, Err(error)) => {
                tracing::warn!(%error, "ignoring invalid encryption key; encrypted stores will read as empty");
                Ok(StoreCodec::plain())
            }
        }
    }
}

fn parse_positive<T>(env: &BTreeMap<String, String>, name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    parse_non_negative::<T>(env, name).filter(|value| *value > T::default())
}

fn parse_non_negative<T>(env: &BTreeMap<String, String>, name: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = env.get(name)?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = raw.parse::<T>().ok();
    if parsed.is_none() {
        tracing::warn!(value = %raw, "ignoring invalid {name}");
    }
    parsed
}

/// Adds `.rootrace` to `<root>/.gitignore` unless an equivalent line exists.
/// Returns whether the file was changed; I/O failures are logged and ignored.
pub fn ensure_gitignore_entry(workspace_root: &Path) -> bool {
    let gitignore = workspace_root.join(".gitignore");
    let existing = match std::fs::read_to_string(&gitignore) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(error) => {
            tracing::warn!(path = %gitignore.display(), %error, "failed to read .gitignore");
            return false;
        }
    };

    let already_listed = existing.lines().map(str::trim).any(|line| {
        matches!(
            line,
            ".rootrace" | ".rootrace/" | "/.rootrace" | "/.rootrace/"
        )
    });
    if already_listed {
        return false;
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(STORE_DIR_NAME);
    updated.push('\n');
    match write_text_atomic(&gitignore, &updated) {
        Ok(()) => {
            tracing::debug!(path = %gitignore.display(), "added .rootrace to .gitignore");
            true
        }
        Err(error) => {
            tracing::warn!(path = %gitignore.display(), %error, "failed to update .gitignore");
            false
        }
    }
}
