use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rootrace_store::{ExportFormat, StoreFormat};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| format!("expected an RFC 3339 timestamp: {error}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliStoreFormat {
    Plain,
    Encrypted,
}

impl From<CliStoreFormat> for StoreFormat {
    fn from(value: CliStoreFormat) -> Self {
        match value {
            CliStoreFormat::Plain => StoreFormat::Plain,
            CliStoreFormat::Encrypted => StoreFormat::Encrypted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliExportFormat {
    Json,
    Csv,
    Markdown,
    Html,
    Excel,
}

impl From<CliExportFormat> for ExportFormat {
    fn from(value: CliExportFormat) -> Self {
        match value {
            CliExportFormat::Json => ExportFormat::Json,
            CliExportFormat::Csv => ExportFormat::Csv,
            CliExportFormat::Markdown => ExportFormat::Markdown,
            CliExportFormat::Html => ExportFormat::Html,
            CliExportFormat::Excel => ExportFormat::Excel,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "rootrace",
    about = "Record and inspect RooTrace debug logs shared through the workspace store file",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "ROOTRACE_WORKSPACE",
        help = "Workspace root holding .rootrace/ai_debug_logs.json. Defaults to the current directory."
    )]
    pub workspace: Option<PathBuf>,

    #[arg(
        long = "max-logs",
        global = true,
        env = "ROOTRACE_MAX_LOGS",
        value_parser = parse_positive_usize,
        help = "Maximum entries kept in the store; oldest entries are evicted first."
    )]
    pub max_logs: Option<usize>,

    #[arg(
        long = "store-format",
        global = true,
        env = "ROOTRACE_STORE_FORMAT",
        value_enum,
        help = "Encoding used when this process writes the store file."
    )]
    pub store_format: Option<CliStoreFormat>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Append one entry.
    Add(AddArgs),
    /// Print entries, optionally filtered, in an export format.
    Query(QueryArgs),
    /// Print the number of stored entries.
    Count,
    /// Remove every entry.
    Clear,
    /// Print the hypothesis catalog.
    Hypotheses,
    /// Follow the store file and print a line per settled change.
    Watch(WatchArgs),
}

#[derive(Debug, clap::Args)]
pub struct AddArgs {
    #[arg(long = "source", help = "Source/hypothesis id, e.g. H1.")]
    pub source: String,

    #[arg(long, default_value = "", help = "Free-form description of the event.")]
    pub context: String,

    #[arg(
        long,
        help = "Payload as JSON. Text that is not valid JSON is stored as a string."
    )]
    pub data: Option<String>,

    #[arg(
        long,
        value_parser = parse_timestamp,
        help = "RFC 3339 timestamp; defaults to now."
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, clap::Args)]
pub struct QueryArgs {
    #[arg(
        long = "source",
        value_delimiter = ',',
        help = "Only entries from these source ids."
    )]
    pub sources: Vec<String>,

    #[arg(long, value_parser = parse_timestamp, help = "Inclusive lower bound (RFC 3339).")]
    pub since: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_timestamp, help = "Inclusive upper bound (RFC 3339).")]
    pub until: Option<DateTime<Utc>>,

    #[arg(long, value_enum, default_value = "json")]
    pub format: CliExportFormat,

    #[arg(long, help = "Answer from the state loaded at startup without re-reading the file.")]
    pub local: bool,

    #[arg(long, help = "Include export metadata in markdown and html output.")]
    pub metadata: bool,

    #[arg(
        long,
        value_name = "FILE",
        num_args = 0..=1,
        help = "Save the export under the workspace instead of printing it. Without FILE the name is roo-trace-logs-<unix ms>.<ext>."
    )]
    pub output: Option<Option<String>>,
}

#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    #[arg(
        long = "interval-ms",
        env = "ROOTRACE_WATCH_INTERVAL_MS",
        value_parser = parse_positive_u64
    )]
    pub interval_ms: Option<u64>,

    #[arg(long = "debounce-ms", env = "ROOTRACE_WATCH_DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,

    #[arg(
        long = "max-updates",
        value_parser = parse_positive_usize,
        help = "Exit after this many updates instead of waiting for Ctrl-C."
    )]
    pub max_updates: Option<usize>,
}
