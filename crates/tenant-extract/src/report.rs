//! Serializable run results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::copy::{UnitOutcome, UnitRunner, UnitStatus};
use crate::error::{ExtractError, Result};
use crate::registry::RegistryKey;

/// Result of an extraction run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Tenant that was extracted.
    pub tenant_alias: String,

    /// Final status.
    pub status: String,

    /// Hash of the configuration the run used.
    pub config_hash: String,

    /// Whether target writes were suppressed.
    pub dry_run: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Stages that ran to completion.
    pub stages_completed: usize,

    /// Total rows selected from the source.
    pub rows_read: u64,

    /// Total rows written to the target.
    pub rows_written: u64,

    /// Size of every discovered key set.
    pub registry: BTreeMap<RegistryKey, usize>,

    /// Per-unit results, in completion order within each stage.
    pub units: Vec<UnitReport>,

    /// Row count comparisons, if verification ran.
    pub verification: Vec<VerifyResult>,
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Report of a single unit.
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Whether every verified unit matched.
    pub fn verified_clean(&self) -> bool {
        self.verification.iter().all(|v| v.matched)
    }
}

/// Result of one copy unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub table: String,
    pub stage: usize,
    pub status: UnitStatus,
    /// Status transitions in order.
    pub history: Vec<UnitStatus>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_scanned: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub batches: u64,
    /// Number of keys discovered per produced set.
    pub produced: BTreeMap<RegistryKey, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    /// Build a report from a finished runner.
    pub fn new(
        stage: usize,
        runner: &UnitRunner,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: std::result::Result<&UnitOutcome, &ExtractError>,
    ) -> Self {
        let unit = runner.unit();
        let mut report = Self {
            name: unit.name.to_string(),
            table: unit.table.to_string(),
            stage,
            status: runner.status(),
            history: runner.history().to_vec(),
            attempts: runner.attempts(),
            started_at,
            finished_at,
            rows_scanned: 0,
            rows_read: 0,
            rows_written: 0,
            rows_skipped: 0,
            batches: 0,
            produced: BTreeMap::new(),
            error: None,
        };
        match result {
            Ok(outcome) => {
                report.rows_scanned = outcome.rows_scanned;
                report.rows_read = outcome.rows_read;
                report.rows_written = outcome.write.written;
                report.rows_skipped = outcome.write.skipped;
                report.batches = outcome.write.batches;
                report.produced = outcome
                    .produced
                    .iter()
                    .map(|(k, v)| (*k, v.len()))
                    .collect();
            }
            Err(e) => report.error = Some(e.root().to_string()),
        }
        report
    }
}

/// Row count comparison for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub unit: String,
    pub table: String,
    pub source_rows: u64,
    pub target_rows: u64,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connectivity of both sides.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}
