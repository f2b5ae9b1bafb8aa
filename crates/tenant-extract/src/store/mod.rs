//! Connection abstraction over the source and target databases.
//!
//! The pipeline talks to both sides through the [`Store`] trait, which offers
//! exactly the primitives a tenant copy needs:
//!
//! - a keyed request/response query ([`Store::fetch`])
//! - a streaming full-table scan ([`Store::scan`])
//! - an atomic batched write ([`Store::write_batch`])
//! - create-if-absent schema statements for the bootstrap
//!
//! Implementations:
//!
//! - [`MemoryStore`]: in-process tables, used by tests and for embedding
//! - `CqlStore`: Cassandra/ScyllaDB via the `scylla` driver (`cql` feature)

mod memory;
mod value;

#[cfg(feature = "cql")]
mod cql;

pub use memory::MemoryStore;
pub use value::{Row, Value};

#[cfg(feature = "cql")]
pub use cql::CqlStore;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::schema::TableDef;

/// Receiver side of a full-table scan.
///
/// Yields rows until the table is exhausted (`None`), or a single `Err` if
/// the scan failed, after which the stream ends.
pub type RowStream = mpsc::Receiver<Result<Row>>;

/// Buffered rows between a scanning task and its consumer.
pub const SCAN_CHANNEL_CAPACITY: usize = 256;

/// A lookup of rows whose `column` equals one of `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedQuery {
    /// Table to read.
    pub table: String,
    /// Partition key or indexed column.
    pub column: String,
    /// Key values; never empty when issued.
    pub keys: Vec<String>,
}

impl KeyedQuery {
    /// Parameterized CQL for this lookup.
    pub fn cql(&self, keyspace: &str) -> String {
        let restriction = if self.keys.len() == 1 {
            format!("\"{}\" = ?", self.column)
        } else {
            let placeholders = vec!["?"; self.keys.len()].join(", ");
            format!("\"{}\" IN ({})", self.column, placeholders)
        };
        format!(
            "SELECT * FROM {}.\"{}\" WHERE {}",
            keyspace, self.table, restriction
        )
    }
}

/// Parameterized insert statement for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTemplate {
    /// Target table.
    pub table: String,
    /// Bound columns, in placeholder order.
    pub columns: Vec<String>,
    /// Columns that must be present in every bound row.
    pub primary_key: Vec<String>,
}

impl InsertTemplate {
    /// Parameterized CQL for this insert.
    pub fn cql(&self, keyspace: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {}.\"{}\" ({}) VALUES ({})",
            keyspace, self.table, columns, placeholders
        )
    }

    /// Bind a row's values in column order.
    ///
    /// Absent columns are bound as null. Returns `None` if a primary key
    /// column is absent or null.
    /// Whether `row` carries every primary key column.
    pub fn accepts(&self, row: &Row) -> bool {
        self.primary_key.iter().all(|c| row.has(c))
    }

    pub fn bind(&self, row: &Row) -> Option<Vec<Value>> {
        if !self.accepts(row) {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// An ordered set of bound inserts applied as one unit of work.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    statements: Vec<(Arc<InsertTemplate>, Vec<Value>)>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bound statement.
    pub fn push(&mut self, template: Arc<InsertTemplate>, values: Vec<Value>) {
        self.statements.push((template, values));
    }

    /// Bound statements in order.
    pub fn statements(&self) -> &[(Arc<InsertTemplate>, Vec<Value>)] {
        &self.statements
    }

    /// Get the number of statements in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Name of the first statement's table, for logs and errors.
    pub fn table(&self) -> &str {
        self.statements
            .first()
            .map(|(t, _)| t.table.as_str())
            .unwrap_or("")
    }
}

/// A keyspace on a source or target cluster.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short description of the backing store, for logs.
    fn describe(&self) -> String;

    /// Check the connection is usable.
    async fn ping(&self) -> Result<()>;

    /// Create the keyspace if it does not exist.
    async fn create_keyspace(&self, replication: &ReplicationConfig) -> Result<()>;

    /// Create a table (and its secondary indexes) if it does not exist.
    async fn create_table(&self, table: &TableDef) -> Result<()>;

    /// Fetch every row matching a keyed lookup.
    async fn fetch(&self, query: &KeyedQuery) -> Result<Vec<Row>>;

    /// Start streaming every row of a table.
    ///
    /// The store spawns a background task that feeds the channel, so the
    /// consumer sees rows incrementally with backpressure.
    fn scan(&self, table: &str) -> RowStream;

    /// Apply all statements of a batch atomically.
    async fn write_batch(&self, batch: &Batch) -> Result<()>;
}
