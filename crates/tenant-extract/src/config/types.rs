//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared multi-tenant database the tenant is extracted from.
    pub source: StoreConfig,

    /// Isolated per-tenant database the tenant is copied into.
    pub target: StoreConfig,

    /// Extraction behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// The tenant being extracted.
    pub fn tenant_alias(&self) -> &str {
        &self.source.tenant_alias
    }
}

/// Connection settings for one side of the copy.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Contact points (`host` or `host:port`).
    pub hosts: Vec<String>,

    /// Keyspace holding the tables.
    pub keyspace: String,

    /// Tenant scope identifier.
    pub tenant_alias: String,

    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Keyspace replication, used when the keyspace has to be created.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Optional username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Optional password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("hosts", &self.hosts)
            .field("keyspace", &self.keyspace)
            .field("tenant_alias", &self.tenant_alias)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("replication", &self.replication)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl StoreConfig {
    /// Human-readable endpoint for logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.hosts.join(","), self.keyspace)
    }
}

/// Keyspace replication strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Replication strategy class (default: SimpleStrategy).
    #[serde(default = "default_replication_class")]
    pub class: String,

    /// Replication factor (default: 1).
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            class: default_replication_class(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Extraction behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum statements per write batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum keys per `IN (...)` lookup (default: 100).
    #[serde(default = "default_key_chunk_size")]
    pub key_chunk_size: usize,

    /// Copy units allowed in flight within one stage (default: 8).
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Compare source and target row counts after the copy (default: true).
    #[serde(default = "default_true")]
    pub verify: bool,

    /// Units to verify. Empty means every unit.
    #[serde(default)]
    pub verify_units: Vec<String>,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            key_chunk_size: default_key_chunk_size(),
            max_concurrent_units: default_max_concurrent_units(),
            verify: true,
            verify_units: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Unit-level retry policy.
///
/// The default of a single attempt aborts the run on the first error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per unit, including the first (default: 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds (default: 500).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// Default value functions for serde
fn default_connect_timeout() -> u64 {
    10
}

fn default_replication_class() -> String {
    "SimpleStrategy".to_string()
}

fn default_replication_factor() -> u32 {
    1
}

fn default_batch_size() -> usize {
    100
}

fn default_key_chunk_size() -> usize {
    100
}

fn default_max_concurrent_units() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}
