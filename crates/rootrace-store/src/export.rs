//! Renders entries as JSON, CSV, Markdown or HTML reports and saves them
//! into the workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use rootrace_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::types::LogEntry;
use crate::LogStoreError;

const DEFAULT_EXPORT_PREFIX: &str = "roo-trace-logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Markdown,
    Html,
    /// CSV under a spreadsheet-friendly name.
    Excel,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "markdown" | "md" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "excel" | "xls" => Some(Self::Excel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Excel => "excel",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv | Self::Excel => "csv",
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Empty means every source.
    pub source_ids: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Adds export time and count to Markdown and HTML output.
    pub include_metadata: bool,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        if !self.source_ids.is_empty() && !self.source_ids.contains(&entry.source_id) {
            return false;
        }
        if self.start.is_none() && self.end.is_none() {
            return true;
        }
        let Some(at) = entry.parsed_timestamp() else {
            return false;
        };
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    logs: Vec<&'a LogEntry>,
    exported_at: String,
    total_count: usize,
}

/// Entries matching `options` filters, in input order.
pub fn filter_entries<'a>(entries: &'a [LogEntry], options: &ExportOptions) -> Vec<&'a LogEntry> {
    entries.iter().filter(|entry| options.matches(entry)).collect()
}

pub fn export_logs(entries: &[LogEntry], options: &ExportOptions) -> Result<String, LogStoreError> {
    let selected = filter_entries(entries, options);
    let exported_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    match options.format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&JsonExport {
            total_count: selected.len(),
            logs: selected,
            exported_at,
        })?),
        ExportFormat::Csv | ExportFormat::Excel => Ok(render_csv(&selected)),
        ExportFormat::Markdown => Ok(render_markdown(&selected, options, &exported_at)),
        ExportFormat::Html => Ok(render_html(&selected, options, &exported_at)),
    }
}

/// Writes rendered `content` under `workspace_root` and returns the path.
///
/// Without a `filename` the file is named `roo-trace-logs-<unix ms>.<ext>`.
/// An absolute `filename` is used as is.
pub fn save_export(
    workspace_root: &Path,
    content: &str,
    format: ExportFormat,
    filename: Option<&str>,
) -> Result<PathBuf, LogStoreError> {
    let path = match filename.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => workspace_root.join(name),
        None => workspace_root.join(default_export_filename(
            format,
            current_unix_timestamp_ms(),
        )),
    };
    write_text_atomic(&path, content)?;
    tracing::debug!(path = %path.display(), format = %format, "saved log export");
    Ok(path)
}

fn default_export_filename(format: ExportFormat, unix_ms: u64) -> String {
    format!("{DEFAULT_EXPORT_PREFIX}-{unix_ms}.{}", format.file_extension())
}

fn render_csv(entries: &[&LogEntry]) -> String {
    let mut rows = vec!["Timestamp,Source ID,Context,Data".to_string()];
    for entry in entries {
        rows.push(format!(
            "{},{},{},{}",
            entry.timestamp,
            entry.source_id,
            quote_csv(&entry.context),
            quote_csv(&data_text(&entry.data))
        ));
    }
    rows.join("\n")
}

fn quote_csv(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn render_markdown(entries: &[&LogEntry], options: &ExportOptions, exported_at: &str) -> String {
    let mut out = String::from("# RooTrace Debug Logs\n\n");
    if options.include_metadata {
        out.push_str(&format!("**Exported:** {exported_at}\n"));
        out.push_str(&format!("**Total Logs:** {}\n\n", entries.len()));
    }
    out.push_str("## Logs\n\n");
    out.push_str("| Timestamp | Source | Context | Data |\n");
    out.push_str("|-----------|--------|---------|------|\n");
    for entry in entries {
        let data = match &entry.data {
            Value::String(text) => text.clone(),
            other => format!("`{other}`"),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            entry.timestamp,
            entry.source_id,
            escape_cell(&entry.context),
            escape_cell(&data)
        ));
    }
    out
}

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>RooTrace Debug Logs</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 20px; background: #f5f5f5; }
        .header { background: white; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
        table { width: 100%; border-collapse: collapse; background: white; }
        th, td { padding: 12px; text-align: left; border-bottom: 1px solid #ddd; }
        th { background-color: #4CAF50; color: white; }
        .source { font-weight: bold; color: #2196F3; }
        .data { font-family: monospace; font-size: 12px; max-width: 400px; overflow-x: auto; }
        pre { margin: 0; white-space: pre-wrap; }
    </style>
</head>
<body>
    <div class="header">
        <h1>RooTrace Debug Logs</h1>
"#;

fn render_html(entries: &[&LogEntry], options: &ExportOptions, exported_at: &str) -> String {
    let mut out = String::from(HTML_HEAD);
    if options.include_metadata {
        out.push_str(&format!(
            "        <p><strong>Exported:</strong> {exported_at}</p>\n"
        ));
        out.push_str(&format!(
            "        <p><strong>Total Logs:</strong> {}</p>\n",
            entries.len()
        ));
    }
    out.push_str("    </div>\n    <table>\n        <thead>\n            <tr>\n");
    for heading in ["Timestamp", "Source", "Context", "Data"] {
        out.push_str(&format!("                <th>{heading}</th>\n"));
    }
    out.push_str("            </tr>\n        </thead>\n        <tbody>\n");
    for entry in entries {
        let data = match &entry.data {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        out.push_str("            <tr>\n");
        out.push_str(&format!(
            "                <td>{}</td>\n",
            escape_html(&entry.timestamp)
        ));
        out.push_str(&format!(
            "                <td class=\"source\">{}</td>\n",
            escape_html(&entry.source_id)
        ));
        out.push_str(&format!(
            "                <td>{}</td>\n",
            escape_html(&entry.context)
        ));
        out.push_str(&format!(
            "                <td class=\"data\"><pre>{}</pre></td>\n",
            escape_html(&data)
        ));
        out.push_str("            </tr>\n");
    }
    out.push_str("        </tbody>\n    </table>\n</body>\n</html>\n");
    out
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn data_text(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::{
        default_export_filename, escape_html, export_logs, filter_entries, save_export,
        ExportFormat, ExportOptions,
    };
    use crate::types::LogEntry;

    fn fixture() -> Vec<LogEntry> {
        vec![
            LogEntry::with_timestamp(
                "2024-05-01T10:00:00.000Z",
                "H1",
                "said \"hi\"",
                json!({ "a": 1 }),
            ),
            LogEntry::with_timestamp("2024-05-02T10:00:00.000Z", "H2", "pipe | here", json!("raw")),
            LogEntry::with_timestamp("2024-05-03T10:00:00.000Z", "H1", "third", json!(null)),
        ]
    }

    #[test]
    fn unit_json_export_wraps_logs_with_count() {
        let rendered = export_logs(&fixture(), &ExportOptions::new(ExportFormat::Json)).expect("json");
        let value: Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value["totalCount"], 3);
        assert_eq!(value["logs"][1]["sourceId"], "H2");
        assert!(value["exportedAt"].as_str().is_some());
    }

    #[test]
    fn unit_csv_export_doubles_quotes() {
        let rendered = export_logs(&fixture(), &ExportOptions::new(ExportFormat::Csv)).expect("csv");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Timestamp,Source ID,Context,Data");
        assert_eq!(
            lines[1],
            "2024-05-01T10:00:00.000Z,H1,\"said \"\"hi\"\"\",\"{\"\"a\"\":1}\""
        );
        assert_eq!(lines[2], "2024-05-02T10:00:00.000Z,H2,\"pipe | here\",\"raw\"");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn unit_markdown_export_escapes_pipes() {
        let mut options = ExportOptions::new(ExportFormat::Markdown);
        options.include_metadata = true;
        let rendered = export_logs(&fixture(), &options).expect("markdown");
        assert!(rendered.starts_with("# RooTrace Debug Logs\n\n**Exported:** "));
        assert!(rendered.contains("**Total Logs:** 3"));
        assert!(rendered.contains("| 2024-05-02T10:00:00.000Z | H2 | pipe \\| here | raw |"));
        assert!(rendered.contains("| third | `null` |"));
    }

    #[test]
    fn functional_filters_combine_sources_and_inclusive_dates() {
        let entries = fixture();
        let options = ExportOptions {
            source_ids: vec!["H1".to_string()],
            start: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 5, 2, 23, 0, 0).unwrap()),
            ..ExportOptions::default()
        };
        let selected = filter_entries(&entries, &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].context, "said \"hi\"");
    }

    #[test]
    fn unit_export_format_parse() {
        assert_eq!(ExportFormat::parse("MD"), Some(ExportFormat::Markdown));
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("html"), Some(ExportFormat::Html));
        assert_eq!(ExportFormat::parse("Excel"), Some(ExportFormat::Excel));
        assert_eq!(ExportFormat::parse("pdf"), None);
    }

    #[test]
    fn unit_escape_html_covers_markup_and_quotes() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn functional_html_export_escapes_every_cell() {
        let entries = vec![LogEntry::with_timestamp(
            "2024-05-01T10:00:00.000Z",
            "H1",
            "<script>alert('x')</script>",
            json!({ "html": "<b>" }),
        )];
        let mut options = ExportOptions::new(ExportFormat::Html);
        options.include_metadata = true;
        let rendered = export_logs(&entries, &options).expect("html");
        assert!(rendered.starts_with("<!DOCTYPE html>"));
        assert!(rendered.contains("<strong>Total Logs:</strong> 1"));
        assert!(rendered.contains("<td>&lt;script&gt;alert(&#039;x&#039;)&lt;/script&gt;</td>"));
        assert!(rendered.contains("&quot;html&quot;: &quot;&lt;b&gt;&quot;"));
        assert!(!rendered.contains("<script>"));
        assert!(rendered.trim_end().ends_with("</html>"));
    }

    #[test]
    fn unit_excel_export_is_csv() {
        let csv = export_logs(&fixture(), &ExportOptions::new(ExportFormat::Csv)).expect("csv");
        let excel =
            export_logs(&fixture(), &ExportOptions::new(ExportFormat::Excel)).expect("excel");
        assert_eq!(csv, excel);
    }

    #[test]
    fn unit_file_extension_maps_every_format() {
        let extensions: Vec<&str> = [
            ExportFormat::Json,
            ExportFormat::Csv,
            ExportFormat::Markdown,
            ExportFormat::Html,
            ExportFormat::Excel,
        ]
        .into_iter()
        .map(ExportFormat::file_extension)
        .collect();
        assert_eq!(extensions, ["json", "csv", "md", "html", "csv"]);
        assert_eq!(
            default_export_filename(ExportFormat::Excel, 1714557600000),
            "roo-trace-logs-1714557600000.csv"
        );
    }

    #[test]
    fn functional_save_export_writes_default_and_named_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generated =
            save_export(dir.path(), "# report", ExportFormat::Markdown, None).expect("save");
        assert_eq!(generated.parent(), Some(dir.path()));
        let name = generated
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name");
        assert!(name.starts_with("roo-trace-logs-"));
        assert!(name.ends_with(".md"));
        assert_eq!(std::fs::read_to_string(&generated).expect("read"), "# report");

        let named = save_export(
            dir.path(),
            "<html></html>",
            ExportFormat::Html,
            Some("reports/run.html"),
        )
        .expect("save named");
        assert_eq!(named, dir.path().join("reports").join("run.html"));
        assert_eq!(std::fs::read_to_string(&named).expect("read"), "<html></html>");
    }
}
