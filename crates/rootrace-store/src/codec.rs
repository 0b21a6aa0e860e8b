//! Whole-file encode/decode for the store file.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rootrace_core::write_text_atomic_async;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::EnvelopeCipher;
use crate::types::LogEntry;
use crate::LogStoreError;

/// How a writer encodes the store file. Readers always accept both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFormat {
    #[default]
    Plain,
    Encrypted,
}

impl StoreFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plain" | "json" => Some(Self::Plain),
            "encrypted" | "keyed" => Some(Self::Encrypted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Encrypted => "encrypted",
        }
    }
}

impl fmt::Display for StoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step of the fallback chain produced the decoded entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeSource {
    Empty,
    Plain,
    Envelope,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStore {
    pub entries: Vec<LogEntry>,
    pub dropped: usize,
    pub source: DecodeSource,
}

impl DecodedStore {
    fn empty(source: DecodeSource) -> Self {
        Self {
            entries: Vec::new(),
            dropped: 0,
            source,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreCodec {
    format: StoreFormat,
    cipher: Option<Arc<dyn EnvelopeCipher>>,
}

impl StoreCodec {
    /// Writes plain JSON and cannot open encrypted files.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Writes envelopes sealed by `cipher`.
    pub fn encrypted(cipher: Arc<dyn EnvelopeCipher>) -> Self {
        Self {
            format: StoreFormat::Encrypted,
            cipher: Some(cipher),
        }
    }

    /// Writes plain JSON but can still open envelopes sealed by `cipher`.
    pub fn plain_with_decoder(cipher: Arc<dyn EnvelopeCipher>) -> Self {
        Self {
            format: StoreFormat::Plain,
            cipher: Some(cipher),
        }
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    pub fn encode(&self, entries: &[LogEntry]) -> Result<String, LogStoreError> {
        match (self.format, self.cipher.as_deref()) {
            (StoreFormat::Encrypted, Some(cipher)) => {
                let value = serde_json::to_value(entries)?;
                Ok(cipher.encode(&value)?)
            }
            _ => Ok(serde_json::to_string_pretty(entries)?),
        }
    }

    /// Plain array, else decrypt-then-parse, else empty. Never fails.
    pub fn decode(&self, content: &str) -> DecodedStore {
        if content.trim().is_empty() {
            return DecodedStore::empty(DecodeSource::Empty);
        }

        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) {
            return collect_entries(&items, DecodeSource::Plain);
        }

        if let Some(cipher) = self.cipher.as_deref() {
            match cipher.decode(content) {
                Ok(Value::Array(items)) => return collect_entries(&items, DecodeSource::Envelope),
                Ok(_) => {
                    tracing::debug!("store envelope decoded to a non-array value");
                }
                Err(error) => {
                    tracing::debug!(%error, "store envelope could not be opened");
                }
            }
        }

        DecodedStore::empty(DecodeSource::Fallback)
    }

    /// Best-effort read; any I/O or decode problem yields an empty list.
    pub async fn read(&self, path: &Path) -> Vec<LogEntry> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(store = %path.display(), "store file missing; treating as empty");
                return Vec::new();
            }
            Err(error) => {
                tracing::warn!(store = %path.display(), %error, "failed to read store file; treating as empty");
                return Vec::new();
            }
        };

        let decoded = self.decode(&content);
        match decoded.source {
            DecodeSource::Fallback => {
                tracing::warn!(
                    store = %path.display(),
                    bytes = content.len(),
                    "store file is neither a JSON array nor a readable envelope; treating as empty"
                );
            }
            _ if decoded.dropped > 0 => {
                tracing::debug!(
                    store = %path.display(),
                    dropped = decoded.dropped,
                    kept = decoded.entries.len(),
                    "dropped malformed store entries"
                );
            }
            _ => {}
        }
        decoded.entries
    }

    /// Replaces the whole file; parent directories are created on demand.
    pub async fn write(&self, path: &Path, entries: &[LogEntry]) -> Result<(), LogStoreError> {
        let payload = self.encode(entries)?;
        write_text_atomic_async(path, &payload).await?;
        tracing::debug!(
            store = %path.display(),
            entries = entries.len(),
            format = %self.format,
            "store file rewritten"
        );
        Ok(())
    }
}

fn collect_entries(items: &[Value], source: DecodeSource) -> DecodedStore {
    let entries: Vec<LogEntry> = items.iter().filter_map(entry_from_value).collect();
    DecodedStore {
        dropped: items.len() - entries.len(),
        entries,
        source,
    }
}

/// Lenient shape check: `timestamp`, `sourceId` (or legacy `hypothesisId`)
/// and `context` must be present; everything else is coerced.
pub fn entry_from_value(value: &Value) -> Option<LogEntry> {
    let object = value.as_object()?;
    let timestamp = object.get("timestamp")?;
    let source_id = source_id_field(object)?;
    let context = object.get("context")?;
    Some(LogEntry {
        timestamp: stringify(timestamp),
        source_id: stringify(source_id),
        context: match context {
            Value::Null => String::new(),
            other => stringify(other),
        },
        data: object
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    })
}

fn source_id_field(object: &Map<String, Value>) -> Option<&Value> {
    object.get("sourceId").or_else(|| object.get("hypothesisId"))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
