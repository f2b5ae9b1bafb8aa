//! Copy units: one table's tenant-scoped read, write and key discovery.
//!
//! A [`CopyUnit`] is a static descriptor. At run time a [`UnitRunner`]
//! executes it against a [`UnitContext`]:
//!
//! 1. read the tenant's rows from the source, either by keyed lookup or by
//!    a filtered full-table scan
//! 2. extract the key sets this unit produces
//! 3. write the rows to the target in atomic batches
//!
//! The runner never touches the registry itself; discovered keys are
//! returned in the [`UnitOutcome`] and merged by the orchestrator.

pub mod keyed;
pub mod scan;
pub mod writer;

pub use keyed::{fetch_keyed, KeySource, Lookup};
pub use scan::{scan_filter, Matcher, Predicate};
pub use writer::{write_rows, WriteStats};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::{ExtractError, Result};
use crate::registry::{self, KeyRegistry, RegistryKey};
use crate::schema::{self, TableDef};
use crate::store::{Row, Store};

/// How a unit selects the tenant's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Full-table scan with a row predicate.
    Scan(Predicate),
    /// Direct lookup by partition key or indexed column.
    Keyed(Lookup),
}

/// A key set extracted from a unit's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProducer {
    pub key: RegistryKey,
    /// Column the values are taken from.
    pub column: &'static str,
}

/// Descriptor of one table copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUnit {
    pub name: &'static str,
    pub table: &'static str,
    pub access: Access,
    pub produces: Vec<KeyProducer>,
}

impl CopyUnit {
    pub fn keyed(name: &'static str, table: &'static str, lookup: Lookup) -> Self {
        Self {
            name,
            table,
            access: Access::Keyed(lookup),
            produces: Vec::new(),
        }
    }

    pub fn scan(name: &'static str, table: &'static str, predicate: Predicate) -> Self {
        Self {
            name,
            table,
            access: Access::Scan(predicate),
            produces: Vec::new(),
        }
    }

    /// Register `column` values of the copied rows under `key`.
    #[must_use]
    pub fn producing(mut self, key: RegistryKey, column: &'static str) -> Self {
        self.produces.push(KeyProducer { key, column });
        self
    }

    /// Registry keys this unit reads, without duplicates.
    pub fn consumes(&self) -> Vec<RegistryKey> {
        let mut keys = match &self.access {
            Access::Keyed(lookup) => match lookup.keys {
                KeySource::Tenant => Vec::new(),
                KeySource::Registry(key) => vec![key],
            },
            Access::Scan(predicate) => predicate.consumes(),
        };
        keys.sort();
        keys.dedup();
        keys
    }

    /// Catalog definition of the unit's table.
    pub fn table_def(&self) -> Result<&'static TableDef> {
        schema::table(self.table).ok_or_else(|| {
            ExtractError::Plan(format!(
                "unit {} references unknown table {}",
                self.name, self.table
            ))
        })
    }

    /// Whether this unit reads with a full-table scan.
    pub fn is_scan(&self) -> bool {
        matches!(self.access, Access::Scan(_))
    }
}

/// Lifecycle of a unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Fetching,
    Filtering,
    Writing,
    Done,
    Failed,
}

impl UnitStatus {
    fn can_become(self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Filtering)
                | (Fetching, Writing)
                | (Filtering, Writing)
                | (Writing, Done)
                | (Fetching | Filtering | Writing, Pending)
                | (Pending | Fetching | Filtering | Writing, Failed)
        )
    }
}

/// Rows selected for the tenant.
#[derive(Debug, Default)]
pub struct ReadResult {
    /// Rows that belong to the tenant.
    pub rows: Vec<Row>,
    /// Rows read from the source, matching or not.
    pub scanned: u64,
}

/// Everything a unit needs to run.
#[derive(Clone)]
pub struct UnitContext {
    pub source: Arc<dyn Store>,
    pub target: Arc<dyn Store>,
    pub tenant_alias: String,
    /// Registry as of the end of the previous stage.
    pub registry: Arc<KeyRegistry>,
    pub batch_size: usize,
    pub key_chunk_size: usize,
    pub retry: RetryConfig,
    /// Read and discover keys, but write nothing.
    pub dry_run: bool,
}

/// Result of a successful unit.
#[derive(Debug, Clone, Default)]
pub struct UnitOutcome {
    pub rows_scanned: u64,
    pub rows_read: u64,
    pub write: WriteStats,
    /// Discovered key sets, deduplicated.
    pub produced: Vec<(RegistryKey, Vec<String>)>,
}

/// Read the tenant's rows of `unit` from `store`.
///
/// Shared by the copy itself and by verification, which runs the same read
/// against the target.
pub async fn read_tenant_rows(
    unit: &CopyUnit,
    store: &dyn Store,
    tenant_alias: &str,
    registry: &KeyRegistry,
    key_chunk_size: usize,
) -> Result<ReadResult> {
    match &unit.access {
        Access::Keyed(lookup) => {
            let keys = lookup.resolve(tenant_alias, registry);
            let rows = fetch_keyed(store, unit.table, lookup.column, &keys, key_chunk_size).await?;
            Ok(ReadResult {
                scanned: rows.len() as u64,
                rows,
            })
        }
        Access::Scan(predicate) => {
            let matcher = predicate.compile(tenant_alias, registry);
            scan_filter(store, unit.table, &matcher).await
        }
    }
}

/// Extract every produced key set from `rows`.
pub fn extract_keys<'a, I>(producers: &[KeyProducer], rows: I) -> Vec<(RegistryKey, Vec<String>)>
where
    I: IntoIterator<Item = &'a Row> + Clone,
{
    producers
        .iter()
        .map(|producer| {
            let mut values = Vec::new();
            for value in rows.clone().into_iter().filter_map(|row| row.get(producer.column)) {
                value.collect_keys(&mut values);
            }
            (producer.key, registry::dedup(values))
        })
        .collect()
}

/// Executes one unit, tracking its status.
pub struct UnitRunner {
    unit: CopyUnit,
    ctx: UnitContext,
    status: UnitStatus,
    history: Vec<UnitStatus>,
    attempts: u32,
}

impl UnitRunner {
    pub fn new(unit: CopyUnit, ctx: UnitContext) -> Self {
        Self {
            unit,
            ctx,
            status: UnitStatus::Pending,
            history: vec![UnitStatus::Pending],
            attempts: 0,
        }
    }

    pub fn unit(&self) -> &CopyUnit {
        &self.unit
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// Every status the unit passed through, in order.
    pub fn history(&self) -> &[UnitStatus] {
        &self.history
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run the unit, retrying transient failures up to the configured limit.
    ///
    /// Errors are wrapped with the unit name.
    pub async fn run(&mut self) -> Result<UnitOutcome> {
        let max_attempts = self.ctx.retry.max_attempts.max(1);
        loop {
            self.attempts += 1;
            match self.attempt().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && self.attempts < max_attempts => {
                    warn!(
                        "{}: attempt {}/{} failed, retrying in {}ms: {}",
                        self.unit.name, self.attempts, max_attempts, self.ctx.retry.backoff_ms, e
                    );
                    self.transition(UnitStatus::Pending);
                    tokio::time::sleep(Duration::from_millis(self.ctx.retry.backoff_ms)).await;
                }
                Err(e) => {
                    self.transition(UnitStatus::Failed);
                    error!("{}: failed: {}", self.unit.name, e);
                    return Err(e.in_unit(self.unit.name));
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<UnitOutcome> {
        let table = self.unit.table_def()?;

        self.transition(UnitStatus::Fetching);
        let read = read_tenant_rows(
            &self.unit,
            self.ctx.source.as_ref(),
            &self.ctx.tenant_alias,
            &self.ctx.registry,
            self.ctx.key_chunk_size,
        )
        .await?;
        if self.unit.is_scan() {
            self.transition(UnitStatus::Filtering);
        }

        // Keys only from rows the writer will accept.
        let template = table.insert_template();
        let produced = extract_keys(
            &self.unit.produces,
            read.rows.iter().filter(|row| template.accepts(row)),
        );
        for (key, values) in &produced {
            debug!("{}: discovered {} {}", self.unit.name, values.len(), key);
        }

        self.transition(UnitStatus::Writing);
        let write = if self.ctx.dry_run {
            info!(
                "{}: dry run, not writing {} rows",
                self.unit.name,
                read.rows.len()
            );
            WriteStats::default()
        } else {
            write_rows(
                self.ctx.target.as_ref(),
                table,
                &read.rows,
                self.ctx.batch_size,
            )
            .await?
        };

        self.transition(UnitStatus::Done);
        info!(
            "{}: {} rows read, {} written",
            self.unit.name,
            read.rows.len(),
            write.written
        );

        Ok(UnitOutcome {
            rows_scanned: read.scanned,
            rows_read: read.rows.len() as u64,
            write,
            produced,
        })
    }

    fn transition(&mut self, next: UnitStatus) {
        debug_assert!(
            self.status.can_become(next),
            "{}: illegal transition {:?} -> {:?}",
            self.unit.name,
            self.status,
            next
        );
        self.status = next;
        self.history.push(next);
    }
}
