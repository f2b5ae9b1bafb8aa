//! In-process store.
//!
//! Tables live in memory and follow wide-column write semantics: an insert
//! replaces any row with the same primary key. Call counters and fault
//! injection make it suitable as a stand-in source or target in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use super::{Batch, KeyedQuery, Row, RowStream, Store, SCAN_CHANNEL_CAPACITY};
use crate::config::ReplicationConfig;
use crate::error::{ExtractError, Result};
use crate::schema::TableDef;

/// In-memory keyspace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    keyspace_created: AtomicBool,
    tables: RwLock<BTreeMap<String, MemTable>>,
    faults: Mutex<Faults>,
    unreachable: AtomicBool,
    fetch_calls: AtomicUsize,
    scan_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

struct MemTable {
    def: TableDef,
    rows: BTreeMap<Vec<String>, Row>,
}

impl MemTable {
    fn new(def: &TableDef) -> Self {
        Self {
            def: def.clone(),
            rows: BTreeMap::new(),
        }
    }

    fn upsert(&mut self, row: Row) {
        let key = self
            .def
            .primary_key()
            .iter()
            .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        self.rows.insert(key, row);
    }
}

#[derive(Default)]
struct Faults {
    fetch_failures: HashMap<String, u32>,
    scan_fail_after: HashMap<String, usize>,
    write_failures: HashSet<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table if needed and insert rows without touching call counters.
    pub async fn seed(&self, def: &TableDef, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.inner.tables.write().await;
        let table = tables
            .entry(def.name.to_string())
            .or_insert_with(|| MemTable::new(def));
        for row in rows {
            table.upsert(row);
        }
    }

    /// All rows of a table in primary key order; empty if the table is absent.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Row count of a table; zero if the table is absent.
    pub async fn row_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Names of existing tables, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        self.inner.tables.read().await.keys().cloned().collect()
    }

    /// Whether `create_keyspace` has been called.
    pub fn keyspace_created(&self) -> bool {
        self.inner.keyspace_created.load(Ordering::SeqCst)
    }

    /// Number of keyed fetches issued so far.
    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of scans started so far.
    pub fn scan_calls(&self) -> usize {
        self.inner.scan_calls.load(Ordering::SeqCst)
    }

    /// Number of write batches submitted so far.
    pub fn batch_calls(&self) -> usize {
        self.inner.batch_calls.load(Ordering::SeqCst)
    }

    /// Make the next `times` fetches against `table` fail with a connection error.
    pub async fn fail_fetches(&self, table: &str, times: u32) {
        self.inner
            .faults
            .lock()
            .await
            .fetch_failures
            .insert(table.to_string(), times);
    }

    /// Make scans of `table` error out after yielding `rows` rows.
    pub async fn fail_scan_after(&self, table: &str, rows: usize) {
        self.inner
            .faults
            .lock()
            .await
            .scan_fail_after
            .insert(table.to_string(), rows);
    }

    /// Make every batch touching `table` fail.
    pub async fn fail_writes(&self, table: &str) {
        self.inner
            .faults
            .lock()
            .await
            .write_failures
            .insert(table.to_string());
    }

    /// Simulate a lost connection for `ping`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn ping(&self) -> Result<()> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(ExtractError::connection("memory", "store is unreachable"));
        }
        Ok(())
    }

    async fn create_keyspace(&self, _replication: &ReplicationConfig) -> Result<()> {
        self.inner.keyspace_created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_table(&self, table: &TableDef) -> Result<()> {
        let mut tables = self.inner.tables.write().await;
        tables
            .entry(table.name.to_string())
            .or_insert_with(|| MemTable::new(table));
        Ok(())
    }

    async fn fetch(&self, query: &KeyedQuery) -> Result<Vec<Row>> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut faults = self.inner.faults.lock().await;
            if let Some(remaining) = faults.fetch_failures.get_mut(&query.table) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExtractError::connection(
                        "memory",
                        format!("injected failure reading {}", query.table),
                    ));
                }
            }
        }

        let tables = self.inner.tables.read().await;
        let table = tables.get(&query.table).ok_or_else(|| {
            ExtractError::query(&query.table, format!("unconfigured table {}", query.table))
        })?;

        let keys: HashSet<&str> = query.keys.iter().map(String::as_str).collect();
        let rows = table
            .rows
            .values()
            .filter(|row| row.text(&query.column).is_some_and(|v| keys.contains(v)))
            .cloned()
            .collect();
        Ok(rows)
    }

    fn scan(&self, table: &str) -> RowStream {
        self.inner.scan_calls.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let inner = self.inner.clone();
        let table = table.to_string();

        tokio::spawn(async move {
            let fail_after = inner.faults.lock().await.scan_fail_after.get(&table).copied();
            let rows: Option<Vec<Row>> = inner
                .tables
                .read()
                .await
                .get(&table)
                .map(|t| t.rows.values().cloned().collect());

            let Some(rows) = rows else {
                let _ = tx
                    .send(Err(ExtractError::stream(
                        &table,
                        format!("unconfigured table {}", table),
                    )))
                    .await;
                return;
            };

            for (i, row) in rows.into_iter().enumerate() {
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(ExtractError::stream(&table, "injected scan failure")))
                        .await;
                    return;
                }
                if tx.send(Ok(row)).await.is_err() {
                    debug!("Scan of {} abandoned by consumer", table);
                    return;
                }
            }
        });

        rx
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        self.inner.batch_calls.fetch_add(1, Ordering::SeqCst);

        let faults = self.inner.faults.lock().await;
        let mut tables = self.inner.tables.write().await;

        // Reject the whole batch before applying anything
        for (template, values) in batch.statements() {
            if !tables.contains_key(&template.table) {
                return Err(ExtractError::SchemaMissing(template.table.clone()));
            }
            if faults.write_failures.contains(&template.table) {
                return Err(ExtractError::batch(&template.table, "injected write failure"));
            }
            if values.len() != template.columns.len() {
                return Err(ExtractError::batch(
                    &template.table,
                    format!(
                        "{} values bound for {} columns",
                        values.len(),
                        template.columns.len()
                    ),
                ));
            }
        }

        for (template, values) in batch.statements() {
            let row: Row = template
                .columns
                .iter()
                .zip(values.iter())
                .filter(|(_, v)| !v.is_null())
                .map(|(c, v)| (c.clone(), v.clone()))
                .collect();
            if let Some(table) = tables.get_mut(&template.table) {
                table.upsert(row);
            }
        }

        Ok(())
    }
}
