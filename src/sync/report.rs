use serde::Serialize;

use super::SyncError;
use crate::models::SyncCounts;

/// Outcome of one table sync.
#[derive(Debug)]
pub struct SyncResult {
    pub table: String,
    pub entity: String,
    pub outcome: Result<SyncCounts, SyncError>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of a whole run over many tables.
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<SyncResult>,
    /// Set when a fatal error stopped the run early.
    pub aborted: bool,
    /// Tables never dispatched because the run was aborted.
    pub skipped: Vec<String>,
}

impl RunReport {
    /// Rows written across all successful tables.
    pub fn totals(&self) -> SyncCounts {
        let mut totals = SyncCounts::default();
        for result in &self.results {
            if let Ok(counts) = &result.outcome {
                totals += *counts;
            }
        }
        totals
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// True when every table synced and nothing was skipped.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.skipped.is_empty() && self.results.iter().all(SyncResult::is_success)
    }
}

#[derive(Serialize)]
struct TableView<'a> {
    table: &'a str,
    entity: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    inserted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ReportView<'a> {
    success: bool,
    aborted: bool,
    totals: SyncCounts,
    tables: Vec<TableView<'a>>,
    skipped: &'a [String],
}

impl Serialize for RunReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tables = self
            .results
            .iter()
            .map(|r| match &r.outcome {
                Ok(counts) => TableView {
                    table: &r.table,
                    entity: &r.entity,
                    status: "ok",
                    inserted: Some(counts.inserted),
                    updated: Some(counts.updated),
                    error_kind: None,
                    error: None,
                },
                Err(e) => TableView {
                    table: &r.table,
                    entity: &r.entity,
                    status: "failed",
                    inserted: None,
                    updated: None,
                    error_kind: Some(e.kind()),
                    error: Some(e.to_string()),
                },
            })
            .collect();

        ReportView {
            success: self.is_success(),
            aborted: self.aborted,
            totals: self.totals(),
            tables,
            skipped: &self.skipped,
        }
        .serialize(serializer)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for result in &self.results {
            match &result.outcome {
                Ok(counts) => writeln!(
                    f,
                    "  ✓ {:<28} {} inserted, {} updated",
                    result.table, counts.inserted, counts.updated
                )?,
                Err(e) => writeln!(f, "  ✗ {:<28} {}", result.table, e)?,
            }
        }
        for table in &self.skipped {
            writeln!(f, "  - {:<28} skipped", table)?;
        }

        let totals = self.totals();
        writeln!(f)?;
        if self.aborted {
            write!(f, "Sync aborted. ")?;
        }
        write!(
            f,
            "{} table(s) synced, {} failed: {} inserted, {} updated",
            self.results.len() - self.failures().count(),
            self.failures().count(),
            totals.inserted,
            totals.updated
        )
    }
}
