//! Table catalog and target schema bootstrap.
//!
//! Every table the pipeline touches is declared here once, with its partition
//! key, clustering key and secondary indexes. The same definitions drive the
//! `CREATE TABLE IF NOT EXISTS` bootstrap, the insert templates used by the
//! batch writer, and plan validation.

mod catalog;

pub use catalog::catalog;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::store::{InsertTemplate, Store};

/// Column types used by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqlType {
    Text,
    Boolean,
    Int,
    BigInt,
    Double,
    Timestamp,
    Blob,
    Uuid,
    SetText,
    ListText,
    MapTextText,
}

impl CqlType {
    /// CQL spelling of the type.
    pub fn as_cql(&self) -> &'static str {
        match self {
            CqlType::Text => "text",
            CqlType::Boolean => "boolean",
            CqlType::Int => "int",
            CqlType::BigInt => "bigint",
            CqlType::Double => "double",
            CqlType::Timestamp => "timestamp",
            CqlType::Blob => "blob",
            CqlType::Uuid => "uuid",
            CqlType::SetText => "set<text>",
            CqlType::ListText => "list<text>",
            CqlType::MapTextText => "map<text, text>",
        }
    }
}

/// Definition of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name, identical in source and target.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [(&'static str, CqlType)],
    /// Partition key columns.
    pub partition_key: &'static [&'static str],
    /// Clustering key columns.
    pub clustering_key: &'static [&'static str],
    /// Columns carrying a secondary index.
    pub indexes: &'static [&'static str],
}

impl TableDef {
    /// Partition key followed by clustering key.
    pub fn primary_key(&self) -> Vec<&'static str> {
        self.partition_key
            .iter()
            .chain(self.clustering_key.iter())
            .copied()
            .collect()
    }

    /// Whether the table declares the given column.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| *name == column)
    }

    /// Whether rows can be looked up directly by this column: a single-column
    /// partition key or a secondary index.
    pub fn is_lookup_column(&self, column: &str) -> bool {
        (self.partition_key.len() == 1 && self.partition_key[0] == column)
            || self.indexes.contains(&column)
    }

    /// Whether an `IN (...)` restriction is allowed on this column.
    pub fn supports_in(&self, column: &str) -> bool {
        self.partition_key.len() == 1 && self.partition_key[0] == column
    }

    /// `CREATE TABLE IF NOT EXISTS` body for this table.
    pub fn create_statement(&self, keyspace: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, ty)| format!("\"{}\" {}", name, ty.as_cql()))
            .collect::<Vec<_>>()
            .join(", ");
        let quote = |cols: &[&str]| {
            cols.iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let primary_key = if self.clustering_key.is_empty() {
            format!("({})", quote(self.partition_key))
        } else {
            format!(
                "(({}), {})",
                quote(self.partition_key),
                quote(self.clustering_key)
            )
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {}.\"{}\" ({}, PRIMARY KEY {})",
            keyspace, self.name, columns, primary_key
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` statements for the secondary indexes.
    pub fn index_statements(&self, keyspace: &str) -> Vec<String> {
        self.indexes
            .iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS \"{}_{}_idx\" ON {}.\"{}\" (\"{}\")",
                    self.name, column, keyspace, self.name, column
                )
            })
            .collect()
    }

    /// Insert template covering every column of the table.
    pub fn insert_template(&self) -> InsertTemplate {
        InsertTemplate {
            table: self.name.to_string(),
            columns: self.columns.iter().map(|(c, _)| c.to_string()).collect(),
            primary_key: self.primary_key().iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Find a table definition by name.
pub fn table(name: &str) -> Option<&'static TableDef> {
    catalog().iter().find(|t| t.name == name)
}

/// Ensure the target keyspace and every catalog table exist.
///
/// Safe to run repeatedly; every statement is create-if-absent.
pub async fn bootstrap(store: &Arc<dyn Store>, replication: &ReplicationConfig) -> Result<()> {
    info!(
        "Bootstrapping target schema ({} tables, {} replication factor {})",
        catalog().len(),
        replication.class,
        replication.replication_factor
    );
    store.create_keyspace(replication).await?;
    for table in catalog() {
        debug!("Ensuring table: {}", table.name);
        store.create_table(table).await?;
    }
    Ok(())
}
