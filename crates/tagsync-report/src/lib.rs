//! # tagsync-report
//!
//! Renders transaction results for review: an aligned table, markdown, JSON,
//! and a CSV export for audit. Rows come out in exactly the order the engine
//! returned them, which is plan order.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tagsync_vault::engine::{Mode, TransactionResult, TransactionStatus};

/// Output format for the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Markdown,
}

const COLUMNS: [&str; 7] = [
    "source_tag",
    "target_tag",
    "operation",
    "confidence",
    "status",
    "note",
    "detail",
];

/// One rendered line of the proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub source_tag: String,
    pub target_tag: String,
    pub operation: String,
    pub confidence: u8,
    pub status: TransactionStatus,
    pub note: String,
    pub detail: String,
}

impl ReportRow {
    #[must_use]
    pub fn from_result(result: &TransactionResult) -> Self {
        let change = &result.change;
        Self {
            source_tag: change.new_tag().original().to_string(),
            target_tag: change
                .old()
                .map(|t| t.original().to_string())
                .unwrap_or_default(),
            operation: change.kind().to_string(),
            confidence: change.confidence(),
            status: result.status,
            note: change.target().to_string(),
            detail: result
                .detail
                .clone()
                .unwrap_or_else(|| change.rationale().to_string()),
        }
    }

    fn cells(&self) -> [String; 7] {
        [
            self.source_tag.clone(),
            self.target_tag.clone(),
            self.operation.clone(),
            self.confidence.to_string(),
            self.status.to_string(),
            self.note.clone(),
            self.detail.clone(),
        ]
    }
}

/// Per-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub proposed: usize,
    pub applied: usize,
    pub previewed: usize,
    pub noop: usize,
    pub failed: usize,
}

impl RunSummary {
    #[must_use]
    pub fn from_results(results: &[TransactionResult]) -> Self {
        let mut summary = Self {
            proposed: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                TransactionStatus::Applied => summary.applied += 1,
                TransactionStatus::SkippedDryRun => summary.previewed += 1,
                TransactionStatus::SkippedNoop => summary.noop += 1,
                TransactionStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} proposed, {} applied, {} previewed, {} no-op, {} failed",
            self.proposed, self.applied, self.previewed, self.noop, self.failed
        )
    }
}

/// A failed change and its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub note: String,
    pub change: String,
    pub cause: String,
}

/// Line diff a dry run would make to one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDiff {
    pub note: String,
    pub diff: String,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub mode: Mode,
    pub rows: Vec<ReportRow>,
    pub summary: RunSummary,
    pub failures: Vec<Failure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<NoteDiff>,
}

impl Report {
    #[must_use]
    pub fn new(mode: Mode, results: &[TransactionResult]) -> Self {
        let failures = results
            .iter()
            .filter(|r| r.status == TransactionStatus::Failed)
            .map(|r| Failure {
                note: r.change.target().to_string(),
                change: r.change.to_string(),
                cause: r.detail.clone().unwrap_or_default(),
            })
            .collect();
        let diffs = results
            .iter()
            .filter_map(|r| {
                Some(NoteDiff {
                    note: r.note()?.to_string(),
                    diff: r.diff.clone()?,
                })
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            mode,
            rows: results.iter().map(ReportRow::from_result).collect(),
            summary: RunSummary::from_results(results),
            failures,
            diffs,
        }
    }

    /// Failure list for printing after an apply, one line per failure.
    #[must_use]
    pub fn failure_lines(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {} ({})", f.note, f.change, f.cause))
            .collect()
    }
}

/// Render the report in `format`. Table and markdown output end with the
/// previewed diffs, if any.
#[must_use]
pub fn format_report(report: &Report, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(report),
        OutputFormat::Table => {
            let mut output = format_table(&report.rows);
            for d in &report.diffs {
                output.push('\n');
                output.push_str(&d.diff);
            }
            output
        }
        OutputFormat::Markdown => {
            let mut output = format_markdown(&report.rows);
            for d in &report.diffs {
                output.push_str(&format!("\n```diff\n{}```\n", d.diff));
            }
            output
        }
    }
}

fn format_json(report: &Report) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

fn format_table(rows: &[ReportRow]) -> String {
    if rows.is_empty() {
        return "(no changes proposed)\n".to_string();
    }

    let cells: Vec<[String; 7]> = rows.iter().map(ReportRow::cells).collect();
    let mut widths: Vec<usize> = COLUMNS.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let header: Vec<String> = COLUMNS.iter().map(ToString::to_string).collect();
    let mut output = padded_line(&header, &widths);
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&sep.join("-+-"));
    output.push('\n');
    for row in &cells {
        output.push_str(&padded_line(row, &widths));
    }
    output
}

fn padded_line(values: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{:width$}", v, width = widths[i]))
        .collect();
    let mut line = padded.join(" | ");
    line.truncate(line.trim_end().len());
    line.push('\n');
    line
}

fn format_markdown(rows: &[ReportRow]) -> String {
    if rows.is_empty() {
        return "*No changes proposed*\n".to_string();
    }

    let mut output = String::new();
    output.push_str("| ");
    output.push_str(&COLUMNS.join(" | "));
    output.push_str(" |\n| ");
    output.push_str(&COLUMNS.map(|_| "---").join(" | "));
    output.push_str(" |\n");

    for row in rows {
        let vals: Vec<String> = row
            .cells()
            .iter()
            .map(|c| c.replace('|', "\\|"))
            .collect();
        output.push_str("| ");
        output.push_str(&vals.join(" | "));
        output.push_str(" |\n");
    }
    output
}

/// RFC 4180 field: quoted when it holds a comma, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// The rows as CSV with a header line, CRLF line endings.
#[must_use]
pub fn to_csv(rows: &[ReportRow]) -> String {
    let mut out = COLUMNS.join(",");
    out.push_str("\r\n");
    for row in rows {
        let fields: Vec<String> = row.cells().iter().map(|c| csv_field(c)).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Write the CSV export to `path`, creating its directory if needed.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be written.
pub fn write_csv(rows: &[ReportRow], path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_csv(rows))
}
