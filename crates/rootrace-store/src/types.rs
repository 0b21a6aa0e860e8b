//! Log entry and hypothesis catalog types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One runtime event emitted by injected instrumentation.
///
/// Entries are never mutated after creation. Store order is insertion
/// order, which may disagree with `timestamp` when submissions arrive late.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(alias = "hypothesisId")]
    pub source_id: String,
    pub context: String,
    #[serde(default = "empty_data")]
    pub data: Value,
}

fn empty_data() -> Value {
    Value::Object(serde_json::Map::new())
}

impl LogEntry {
    /// Builds an entry stamped with the current UTC time.
    pub fn new(source_id: impl Into<String>, context: impl Into<String>, data: Value) -> Self {
        Self::with_timestamp(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source_id,
            context,
            data,
        )
    }

    pub fn with_timestamp(
        timestamp: impl Into<String>,
        source_id: impl Into<String>,
        context: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            source_id: source_id.into(),
            context: context.into(),
            data,
        }
    }

    /// Parses `timestamp` as RFC 3339; `None` when it is not a valid instant.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim())
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.parsed_timestamp().map(|value| value.timestamp_millis())
    }
}

/// Lifecycle of a debugging hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Active,
    Testing,
    Pending,
    Resolved,
    Rejected,
}

impl HypothesisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Testing => "testing",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }
}

/// Named bucket that `LogEntry::source_id` values refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub status: HypothesisStatus,
    pub description: String,
}

impl Hypothesis {
    fn new(id: &str, status: HypothesisStatus, description: &str) -> Self {
        Self {
            id: id.to_string(),
            status,
            description: description.to_string(),
        }
    }
}

/// The fixed H1..H5 catalog every store starts with.
pub fn default_hypotheses() -> Vec<Hypothesis> {
    vec![
        Hypothesis::new("H1", HypothesisStatus::Active, "Primary hypothesis"),
        Hypothesis::new("H2", HypothesisStatus::Testing, "Secondary hypothesis"),
        Hypothesis::new("H3", HypothesisStatus::Pending, "Tertiary hypothesis"),
        Hypothesis::new("H4", HypothesisStatus::Pending, "Fourth hypothesis"),
        Hypothesis::new("H5", HypothesisStatus::Pending, "Fifth hypothesis"),
    ]
}
