//! # tenant-extract
//!
//! Single-tenant extraction from a shared multi-tenant CQL database.
//!
//! One tenant's rows are copied out of a shared keyspace into an isolated
//! per-tenant keyspace, keeping references between tables consistent:
//!
//! - **Staged plan**: copies run in dependency order; later copies look up
//!   rows by keys discovered in earlier ones
//! - **Concurrent units** within a stage, bounded by configuration
//! - **Scan filtering** for tables without a tenant-scoped index
//! - **Atomic batches** for every write to the target
//! - **Verification** of per-unit row counts after the copy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_extract::{Config, MemoryStore, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> tenant_extract::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let source = Arc::new(MemoryStore::new());
//!     let target = Arc::new(MemoryStore::new());
//!     let mut orchestrator = Orchestrator::new(config, source, target);
//!     let report = orchestrator.run().await?;
//!     println!("Copied {} rows", report.rows_written);
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod copy;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod report;
pub mod schema;
pub mod store;
pub mod verify;

// Re-exports for convenient access
pub use assets::AssetManifest;
pub use config::{Config, MigrationConfig, ReplicationConfig, RetryConfig, StoreConfig};
pub use copy::{CopyUnit, UnitStatus};
pub use error::{ExtractError, Result};
pub use orchestrator::Orchestrator;
pub use plan::{Edge, Plan, Stage};
pub use registry::{KeyRegistry, RegistryKey};
pub use report::{HealthCheckResult, RunReport, UnitReport, VerifyResult};
pub use store::{MemoryStore, Row, Store, Value};

#[cfg(feature = "cql")]
pub use store::CqlStore;
