//! Keyed lookups against partition keys and indexed columns.

use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::registry::{KeyRegistry, RegistryKey};
use crate::schema;
use crate::store::{KeyedQuery, Row, Store};

/// Where the lookup keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The configured tenant alias, as a single key.
    Tenant,
    /// A key set registered by an earlier stage.
    Registry(RegistryKey),
}

/// A keyed read: rows whose `column` matches one of the source keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub column: &'static str,
    pub keys: KeySource,
    /// Only keys starting with this prefix are looked up.
    pub prefix: Option<&'static str>,
}

impl Lookup {
    /// Look up by the tenant alias.
    pub fn tenant(column: &'static str) -> Self {
        Self {
            column,
            keys: KeySource::Tenant,
            prefix: None,
        }
    }

    /// Look up by a registered key set.
    pub fn registry(column: &'static str, key: RegistryKey) -> Self {
        Self {
            column,
            keys: KeySource::Registry(key),
            prefix: None,
        }
    }

    /// Restrict the keys to those with the given prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Resolve the concrete key list for this run.
    pub fn resolve(&self, tenant_alias: &str, registry: &KeyRegistry) -> Vec<String> {
        let keys: Vec<String> = match self.keys {
            KeySource::Tenant => vec![tenant_alias.to_string()],
            KeySource::Registry(key) => registry.get(key).to_vec(),
        };
        match self.prefix {
            Some(prefix) => keys.into_iter().filter(|k| k.starts_with(prefix)).collect(),
            None => keys,
        }
    }
}

/// Fetch every row of `table` matching `keys` on `column`.
///
/// An empty key list returns an empty result without touching the store.
/// Keys are sent `chunk_size` at a time; columns that cannot take an `IN`
/// restriction (secondary indexes) are queried one key at a time.
pub async fn fetch_keyed(
    store: &dyn Store,
    table: &str,
    column: &str,
    keys: &[String],
    chunk_size: usize,
) -> Result<Vec<Row>> {
    if keys.is_empty() {
        debug!("{}: no keys for {}, skipping fetch", table, column);
        return Ok(Vec::new());
    }

    let def = schema::table(table)
        .ok_or_else(|| ExtractError::query(table, format!("unknown table {}", table)))?;
    let chunk_size = if def.supports_in(column) {
        chunk_size.max(1)
    } else {
        1
    };

    let mut rows = Vec::new();
    for chunk in keys.chunks(chunk_size) {
        let query = KeyedQuery {
            table: table.to_string(),
            column: column.to_string(),
            keys: chunk.to_vec(),
        };
        rows.extend(store.fetch(&query).await?);
    }

    debug!(
        "{}: fetched {} rows for {} keys on {}",
        table,
        rows.len(),
        keys.len(),
        column
    );
    Ok(rows)
}
