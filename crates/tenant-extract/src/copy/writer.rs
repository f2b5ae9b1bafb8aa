//! Batched inserts into the target keyspace.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schema::TableDef;
use crate::store::{Batch, Row, Store};

/// Outcome of writing one unit's rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Rows included in a committed batch.
    pub written: u64,
    /// Batches committed.
    pub batches: u64,
    /// Rows dropped for lacking a primary key column.
    pub skipped: u64,
}

/// Insert `rows` into `table` on `store`, `batch_size` rows per atomic batch.
///
/// An empty row set writes nothing. A rejected batch fails the whole call;
/// batches committed before it stay committed.
pub async fn write_rows(
    store: &dyn Store,
    table: &TableDef,
    rows: &[Row],
    batch_size: usize,
) -> Result<WriteStats> {
    let mut stats = WriteStats::default();

    if rows.is_empty() {
        info!("{}: nothing to write", table.name);
        return Ok(stats);
    }

    let template = Arc::new(table.insert_template());
    let mut bound = Vec::with_capacity(rows.len());
    for row in rows {
        match template.bind(row) {
            Some(values) => bound.push(values),
            None => {
                stats.skipped += 1;
                warn!(
                    "{}: skipping row without primary key ({})",
                    table.name,
                    table.primary_key().join(", ")
                );
            }
        }
    }

    for chunk in bound.chunks(batch_size.max(1)) {
        let mut batch = Batch::new();
        for values in chunk {
            batch.push(template.clone(), values.clone());
        }
        store.write_batch(&batch).await?;
        stats.written += batch.len() as u64;
        stats.batches += 1;
        debug!(
            "{}: committed batch {} ({} rows)",
            table.name,
            stats.batches,
            batch.len()
        );
    }

    Ok(stats)
}
