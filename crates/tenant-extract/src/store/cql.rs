//! Cassandra/ScyllaDB store using the `scylla` driver.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use scylla::batch::{Batch as CqlBatch, BatchType};
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::CqlTimestamp;
use scylla::prepared_statement::PreparedStatement;
use scylla::transport::errors::QueryError;
use scylla::{Session, SessionBuilder};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::{Batch, InsertTemplate, KeyedQuery, Row, RowStream, Store, Value, SCAN_CHANNEL_CAPACITY};
use crate::config::{ReplicationConfig, StoreConfig};
use crate::error::{ExtractError, Result};
use crate::schema::TableDef;

/// A keyspace on a CQL cluster.
pub struct CqlStore {
    session: Arc<Session>,
    keyspace: String,
    endpoint: String,
    prepared: StatementCache<PreparedStatement>,
}

/// Prepared statements by CQL text.
struct StatementCache<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T: Clone> StatementCache<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached statement for `cql`, preparing it on a miss.
    ///
    /// The lock is not held while preparing; concurrent misses on the same
    /// text may both prepare, and the first insert wins.
    async fn get_or_prepare<F, Fut>(&self, cql: String, prepare: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(statement) = self.entries.lock().await.get(&cql) {
            return Ok(statement.clone());
        }
        let statement = prepare(cql.clone()).await?;
        Ok(self
            .entries
            .lock()
            .await
            .entry(cql)
            .or_insert(statement)
            .clone())
    }
}

/// Each distinct template of `batch` once, in first-use order.
fn distinct_templates(batch: &Batch) -> Vec<&InsertTemplate> {
    let mut templates: Vec<&InsertTemplate> = Vec::new();
    for (template, _) in batch.statements() {
        if !templates.iter().any(|t| std::ptr::eq(*t, template.as_ref())) {
            templates.push(template.as_ref());
        }
    }
    templates
}

impl CqlStore {
    /// Open a session to the configured hosts.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        info!("Connecting to {} (keyspace {})", endpoint, config.keyspace);

        let mut builder = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.user(user, password);
        }

        let session = builder
            .build()
            .await
            .map_err(|e| ExtractError::connection(&endpoint, e.to_string()))?;

        Ok(Self {
            session: Arc::new(session),
            keyspace: config.keyspace.clone(),
            endpoint,
            prepared: StatementCache::new(),
        })
    }

    async fn prepare(&self, table: &str, cql: String) -> Result<PreparedStatement> {
        self.prepared
            .get_or_prepare(cql, |cql| async move {
                self.session
                    .prepare(cql.as_str())
                    .await
                    .map_err(|e| map_query_error(table, &self.endpoint, e))
            })
            .await
    }

    async fn execute_ddl(&self, table: &str, cql: String) -> Result<()> {
        debug!("{}", cql);
        self.session
            .query(cql, ())
            .await
            .map_err(|e| map_query_error(table, &self.endpoint, e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for CqlStore {
    fn describe(&self) -> String {
        format!("cql://{}/{}", self.endpoint, self.keyspace)
    }

    async fn ping(&self) -> Result<()> {
        self.session
            .query("SELECT release_version FROM system.local", ())
            .await
            .map_err(|e| ExtractError::connection(&self.endpoint, e.to_string()))?;
        Ok(())
    }

    async fn create_keyspace(&self, replication: &ReplicationConfig) -> Result<()> {
        let cql = format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': '{}', 'replication_factor': {}}}",
            self.keyspace, replication.class, replication.replication_factor
        );
        self.execute_ddl("", cql).await
    }

    async fn create_table(&self, table: &TableDef) -> Result<()> {
        self.execute_ddl(table.name, table.create_statement(&self.keyspace))
            .await?;
        for statement in table.index_statements(&self.keyspace) {
            self.execute_ddl(table.name, statement).await?;
        }
        Ok(())
    }

    async fn fetch(&self, query: &KeyedQuery) -> Result<Vec<Row>> {
        let statement = self
            .prepare(&query.table, query.cql(&self.keyspace))
            .await?;
        let values: Vec<CqlValue> = query.keys.iter().cloned().map(CqlValue::Text).collect();

        let iter = self
            .session
            .execute_iter(statement, values)
            .await
            .map_err(|e| map_query_error(&query.table, &self.endpoint, e))?;
        let columns: Vec<String> = iter
            .get_column_specs()
            .iter()
            .map(|spec| spec.name.clone())
            .collect();

        let mut stream = std::pin::pin!(iter);
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.map_err(|e| map_query_error(&query.table, &self.endpoint, e))?;
            rows.push(convert_row(&query.table, &columns, row.columns)?);
        }
        Ok(rows)
    }

    fn scan(&self, table: &str) -> RowStream {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let session = self.session.clone();
        let endpoint = self.endpoint.clone();
        let table = table.to_string();
        let cql = format!("SELECT * FROM {}.\"{}\"", self.keyspace, table);

        tokio::spawn(async move {
            let iter = match session.query_iter(cql, ()).await {
                Ok(iter) => iter,
                Err(e) => {
                    let _ = tx.send(Err(map_stream_error(&table, &endpoint, e))).await;
                    return;
                }
            };
            let columns: Vec<String> = iter
                .get_column_specs()
                .iter()
                .map(|spec| spec.name.clone())
                .collect();

            let mut stream = std::pin::pin!(iter);
            let mut sent = 0u64;
            while let Some(row) = stream.next().await {
                let item = row
                    .map_err(|e| map_stream_error(&table, &endpoint, e))
                    .and_then(|row| convert_row(&table, &columns, row.columns));
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("Scan of {} abandoned by consumer", table);
                    return;
                }
                if failed {
                    return;
                }
                sent += 1;
            }
            debug!("Scan of {} finished ({} rows)", table, sent);
        });

        rx
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let templates = distinct_templates(batch);
        let mut prepared = Vec::with_capacity(templates.len());
        for template in &templates {
            prepared.push(
                self.prepare(&template.table, template.cql(&self.keyspace))
                    .await?,
            );
        }

        let mut cql_batch = CqlBatch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(batch.len());
        for (template, row) in batch.statements() {
            let index = templates
                .iter()
                .position(|t| std::ptr::eq(*t, template.as_ref()))
                .unwrap_or_default();
            cql_batch.append_statement(prepared[index].clone());
            values.push(row.iter().map(to_cql).collect::<Vec<Option<CqlValue>>>());
        }

        self.session
            .batch(&cql_batch, values)
            .await
            .map_err(|e| match map_query_error(batch.table(), &self.endpoint, e) {
                ExtractError::Query { table, message } => ExtractError::Batch { table, message },
                other => other,
            })?;
        Ok(())
    }
}

fn is_connection_error(e: &QueryError) -> bool {
    matches!(
        e,
        QueryError::IoError(_) | QueryError::TimeoutError | QueryError::RequestTimeout(_)
    )
}

fn map_query_error(table: &str, endpoint: &str, e: QueryError) -> ExtractError {
    let message = e.to_string();
    if message.contains("unconfigured table") {
        ExtractError::SchemaMissing(table.to_string())
    } else if is_connection_error(&e) {
        ExtractError::connection(endpoint, message)
    } else {
        ExtractError::query(table, message)
    }
}

fn map_stream_error(table: &str, endpoint: &str, e: QueryError) -> ExtractError {
    match map_query_error(table, endpoint, e) {
        ExtractError::Query { table, message } => ExtractError::Stream { table, message },
        other => other,
    }
}

fn convert_row(table: &str, columns: &[String], values: Vec<Option<CqlValue>>) -> Result<Row> {
    let mut row = Row::new();
    for (column, value) in columns.iter().zip(values) {
        row.insert(column.as_str(), from_cql(table, value)?);
    }
    Ok(row)
}

fn from_cql(table: &str, value: Option<CqlValue>) -> Result<Value> {
    let Some(value) = value else {
        return Ok(Value::Null);
    };
    let collect = |items: Vec<CqlValue>| -> Result<Vec<Value>> {
        items.into_iter().map(|v| from_cql(table, Some(v))).collect()
    };
    Ok(match value {
        CqlValue::Empty => Value::Null,
        CqlValue::Boolean(v) => Value::Boolean(v),
        CqlValue::Int(v) => Value::Int(v),
        CqlValue::BigInt(v) => Value::BigInt(v),
        CqlValue::Double(v) => Value::Double(v),
        CqlValue::Float(v) => Value::Double(v as f64),
        CqlValue::Text(v) | CqlValue::Ascii(v) => Value::Text(v),
        CqlValue::Blob(v) => Value::Blob(v),
        CqlValue::Uuid(v) => Value::Uuid(v),
        CqlValue::Timestamp(CqlTimestamp(ms)) => Value::Timestamp(
            DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                ExtractError::query(table, format!("timestamp out of range: {}", ms))
            })?,
        ),
        CqlValue::List(items) => Value::List(collect(items)?),
        CqlValue::Set(items) => Value::Set(collect(items)?),
        CqlValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((from_cql(table, Some(k))?, from_cql(table, Some(v))?)))
                .collect::<Result<_>>()?,
        ),
        other => {
            return Err(ExtractError::query(
                table,
                format!("unsupported column value {:?}", other),
            ))
        }
    })
}

fn to_cql(value: &Value) -> Option<CqlValue> {
    Some(match value {
        Value::Null => return None,
        Value::Boolean(v) => CqlValue::Boolean(*v),
        Value::Int(v) => CqlValue::Int(*v),
        Value::BigInt(v) => CqlValue::BigInt(*v),
        Value::Double(v) => CqlValue::Double(*v),
        Value::Text(v) => CqlValue::Text(v.clone()),
        Value::Blob(v) => CqlValue::Blob(v.clone()),
        Value::Uuid(v) => CqlValue::Uuid(*v),
        Value::Timestamp(v) => CqlValue::Timestamp(CqlTimestamp(v.timestamp_millis())),
        Value::List(items) => CqlValue::List(items.iter().filter_map(to_cql).collect()),
        Value::Set(items) => CqlValue::Set(items.iter().filter_map(to_cql).collect()),
        Value::Map(entries) => CqlValue::Map(
            entries
                .iter()
                .filter_map(|(k, v)| Some((to_cql(k)?, to_cql(v)?)))
                .collect(),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_value_conversion_preserves_collections() {
        let value = Value::Map(vec![(Value::Text("small".into()), Value::Text("/p/s".into()))]);
        let cql = to_cql(&value);
        assert_eq!(from_cql("Content", cql).unwrap(), value);
    }

    #[test]
    fn test_timestamp_conversion_is_millisecond_precise() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let cql = to_cql(&Value::Timestamp(ts));
        assert_eq!(
            cql,
            Some(CqlValue::Timestamp(CqlTimestamp(1_700_000_000_123)))
        );
        assert_eq!(from_cql("Revisions", cql).unwrap(), Value::Timestamp(ts));
    }

    #[test]
    fn test_null_round_trip() {
        assert_eq!(to_cql(&Value::Null), None);
        assert_eq!(from_cql("Principals", None).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_statement_cache_prepares_without_holding_lock() {
        let cache = StatementCache::new();
        let entries = &cache.entries;
        let first = cache
            .get_or_prepare("SELECT 1".into(), move |_| async move {
                assert!(entries.try_lock().is_ok());
                Ok(1)
            })
            .await
            .unwrap();
        let second = cache
            .get_or_prepare("SELECT 1".into(), |_| async { Ok(2) })
            .await
            .unwrap();
        assert_eq!((first, second), (1, 1));
    }

    #[test]
    fn test_batch_templates_are_prepared_once() {
        let def = crate::schema::table("Principals").unwrap();
        let template = Arc::new(def.insert_template());
        let mut batch = Batch::new();
        for id in ["u:t1:a", "u:t1:b", "u:t1:c"] {
            let row = Row::new().with("principalId", id).with("tenantAlias", "t1");
            batch.push(template.clone(), template.bind(&row).unwrap());
        }
        assert_eq!(batch.len(), 3);
        assert_eq!(distinct_templates(&batch).len(), 1);
    }

    #[test]
    fn test_unconfigured_table_maps_to_schema_missing() {
        let err = map_query_error(
            "Content",
            "10.0.0.2",
            QueryError::InvalidMessage("unconfigured table Content".into()),
        );
        assert!(matches!(err, ExtractError::SchemaMissing(ref t) if t == "Content"));
    }
}
