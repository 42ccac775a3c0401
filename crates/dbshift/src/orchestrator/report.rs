//! Run reports produced by the [`Orchestrator`](super::Orchestrator).

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, EXIT_CANCELLED, EXIT_RUN_FAILED};
use crate::pipeline::PipelineSummary;

/// Row errors shown per table when not rendering verbosely.
const ERROR_PREVIEW: usize = 3;

/// Final state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Completed,
    /// Finished, but some rows did not reach the target.
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Completed => "completed",
            TableStatus::CompletedWithErrors => "completed_with_errors",
            TableStatus::Failed => "failed",
            TableStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub source_table: String,
    pub target_table: String,
    pub status: TableStatus,
    pub summary: PipelineSummary,
    /// Why the table failed, for [`TableStatus::Failed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    pub(crate) fn finished(source_table: &str, target_table: &str, summary: PipelineSummary) -> Self {
        let status = if summary.cancelled {
            TableStatus::Cancelled
        } else if summary.failed_rows > 0 {
            TableStatus::CompletedWithErrors
        } else {
            TableStatus::Completed
        };
        Self {
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            status,
            summary,
            error: None,
        }
    }

    pub(crate) fn failed(source_table: &str, target_table: &str, error: String) -> Self {
        Self {
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            status: TableStatus::Failed,
            summary: PipelineSummary::default(),
            error: Some(error),
        }
    }

    pub(crate) fn cancelled(source_table: &str, target_table: &str) -> Self {
        Self {
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            status: TableStatus::Cancelled,
            summary: PipelineSummary {
                cancelled: true,
                ..Default::default()
            },
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub tables: usize,
    pub tables_failed: usize,
    pub total_rows: u64,
    pub migrated_rows: u64,
    pub failed_rows: u64,
}

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Hash of the configuration the run used.
    pub config_hash: String,
    pub status: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables: Vec<TableReport>,
    pub totals: ReportTotals,
}

impl MigrationReport {
    pub(crate) fn new(
        run_id: String,
        config_hash: String,
        dry_run: bool,
        started_at: DateTime<Utc>,
        tables: Vec<TableReport>,
    ) -> Self {
        let completed_at = Utc::now();
        let mut totals = ReportTotals {
            tables: tables.len(),
            ..Default::default()
        };
        for table in &tables {
            if table.status == TableStatus::Failed {
                totals.tables_failed += 1;
            }
            totals.total_rows += table.summary.total_rows;
            totals.migrated_rows += table.summary.migrated_rows;
            totals.failed_rows += table.summary.failed_rows;
        }

        let status = if totals.tables_failed > 0 {
            "failed"
        } else if tables.iter().any(|t| t.status == TableStatus::Cancelled) {
            "cancelled"
        } else if totals.failed_rows > 0 {
            "completed_with_errors"
        } else {
            "completed"
        };

        Self {
            run_id,
            config_hash,
            status: status.to_string(),
            dry_run,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables,
            totals,
        }
    }

    pub fn has_failed_tables(&self) -> bool {
        self.totals.tables_failed > 0
    }

    /// Process exit code: failed tables win over cancellation. Row errors
    /// alone still exit 0.
    pub fn exit_code(&self) -> u8 {
        if self.has_failed_tables() {
            EXIT_RUN_FAILED
        } else if self.status == "cancelled" {
            EXIT_CANCELLED
        } else {
            0
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary. Verbose lists every row error; otherwise the
    /// first few per table followed by a count of the rest.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Migration {} ({}){}",
            self.status,
            self.run_id,
            if self.dry_run { " [dry run]" } else { "" }
        );
        let _ = writeln!(
            out,
            "  Tables: {} ({} failed)",
            self.totals.tables, self.totals.tables_failed
        );
        let _ = writeln!(
            out,
            "  Rows: {} total, {} migrated, {} failed",
            self.totals.total_rows, self.totals.migrated_rows, self.totals.failed_rows
        );
        let _ = writeln!(out, "  Duration: {:.2}s", self.duration_seconds);

        for table in &self.tables {
            let _ = writeln!(
                out,
                "\n  {} -> {}: {} ({}/{} rows, {} failed)",
                table.source_table,
                table.target_table,
                table.status.as_str(),
                table.summary.migrated_rows,
                table.summary.total_rows,
                table.summary.failed_rows
            );
            if let Some(ref error) = table.error {
                let _ = writeln!(out, "    Error: {}", error);
            }

            let errors = &table.summary.errors;
            let shown = if verbose {
                errors.len()
            } else {
                errors.len().min(ERROR_PREVIEW)
            };
            for failure in &errors[..shown] {
                let _ = writeln!(
                    out,
                    "    row {} (offset {}): {}",
                    failure.offset + failure.index as u64,
                    failure.offset,
                    failure.message
                );
            }
            if shown < errors.len() {
                let _ = writeln!(out, "    ... and {} more", errors.len() - shown);
            }
        }
        out
    }
}

/// Connectivity of both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Source and target row counts for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableValidation {
    pub source_table: String,
    pub target_table: String,
    pub source_rows: Option<u64>,
    pub target_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableValidation {
    pub fn matches(&self) -> bool {
        self.error.is_none() && self.source_rows.is_some() && self.source_rows == self.target_rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tables: Vec<TableValidation>,
}

impl ValidationReport {
    pub fn all_match(&self) -> bool {
        self.tables.iter().all(TableValidation::matches)
    }

    pub fn exit_code(&self) -> u8 {
        if self.all_match() {
            0
        } else {
            EXIT_RUN_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FailureStage, RowFailure};

    fn summary_with_errors(n: usize) -> PipelineSummary {
        PipelineSummary {
            total_rows: 10,
            migrated_rows: 10 - n as u64,
            failed_rows: n as u64,
            batches: 1,
            errors: (0..n)
                .map(|i| RowFailure {
                    offset: 0,
                    index: i,
                    stage: FailureStage::Write,
                    message: format!("bad row {}", i),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn report(tables: Vec<TableReport>) -> MigrationReport {
        MigrationReport::new("run-1".into(), "abc".into(), false, Utc::now(), tables)
    }

    #[test]
    fn test_totals_and_status() {
        let r = report(vec![
            TableReport::finished("Users", "users", summary_with_errors(0)),
            TableReport::finished("Orders", "orders", summary_with_errors(2)),
        ]);
        assert_eq!(r.status, "completed_with_errors");
        assert_eq!(r.totals.total_rows, 20);
        assert_eq!(r.totals.migrated_rows, 18);
        assert_eq!(r.totals.failed_rows, 2);
        assert!(!r.has_failed_tables());

        let r = report(vec![TableReport::failed("Users", "users", "boom".into())]);
        assert_eq!(r.status, "failed");
        assert!(r.has_failed_tables());
    }

    #[test]
    fn test_exit_codes_by_outcome() {
        let with_row_errors = report(vec![TableReport::finished(
            "Users",
            "users",
            summary_with_errors(2),
        )]);
        assert_eq!(with_row_errors.exit_code(), 0);

        let cancelled = report(vec![TableReport::cancelled("Users", "users")]);
        assert_eq!(cancelled.exit_code(), EXIT_CANCELLED);

        let failed = report(vec![
            TableReport::cancelled("Users", "users"),
            TableReport::failed("Orders", "orders", "boom".into()),
        ]);
        assert_eq!(failed.exit_code(), EXIT_RUN_FAILED);
    }

    #[test]
    fn test_render_truncates_errors() {
        let r = report(vec![TableReport::finished("Users", "users", summary_with_errors(5))]);
        let short = r.render(false);
        assert!(short.contains("bad row 2"));
        assert!(!short.contains("bad row 3"));
        assert!(short.contains("... and 2 more"));

        let full = r.render(true);
        assert!(full.contains("bad row 4"));
        assert!(!full.contains("more"));
    }

    #[test]
    fn test_json_round_trip() {
        let r = report(vec![TableReport::cancelled("Users", "users")]);
        assert_eq!(r.status, "cancelled");
        let parsed: MigrationReport = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_validation_matches() {
        let ok = TableValidation {
            source_table: "Users".into(),
            target_table: "users".into(),
            source_rows: Some(5),
            target_rows: Some(5),
            error: None,
        };
        let short = TableValidation {
            target_rows: Some(4),
            ..ok.clone()
        };
        assert!(ValidationReport { tables: vec![ok.clone()] }.all_match());
        assert_eq!(ValidationReport { tables: vec![ok.clone()] }.exit_code(), 0);
        let mismatch = ValidationReport { tables: vec![ok, short] };
        assert!(!mismatch.all_match());
        assert_eq!(mismatch.exit_code(), EXIT_RUN_FAILED);
    }
}
