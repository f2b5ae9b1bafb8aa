//! Error types for the extraction library.

use thiserror::Error;

/// Process exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code when the source or target cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Process exit code when a required target table is missing.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Process exit code when a copy unit fails.
pub const EXIT_TRANSFER_ERROR: u8 = 4;
/// Process exit code when the copy plan is inconsistent.
pub const EXIT_PLAN_ERROR: u8 = 5;
/// Process exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for extraction operations.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target could not be reached
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// A read against a table failed
    #[error("Query failed for table {table}: {message}")]
    Query { table: String, message: String },

    /// A full-table scan stream terminated with an error
    #[error("Scan of table {table} failed: {message}")]
    Stream { table: String, message: String },

    /// The target has no such table (schema bootstrap did not create it)
    #[error("Table {0} does not exist in the target keyspace")]
    SchemaMissing(String),

    /// A write batch was rejected as a whole
    #[error("Batch write failed for table {table}: {message}")]
    Batch { table: String, message: String },

    /// The copy plan violates a dependency constraint
    #[error("Invalid copy plan: {0}")]
    Plan(String),

    /// A copy unit failed; wraps the underlying cause
    #[error("Copy unit {unit} failed")]
    Unit {
        unit: String,
        #[source]
        source: Box<ExtractError>,
    },

    /// A copy unit task panicked
    #[error("Copy unit {unit} panicked: {message}")]
    UnitPanicked { unit: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    /// Create a Connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Query error.
    pub fn query(table: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::Query {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Stream error.
    pub fn stream(table: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::Stream {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Batch error.
    pub fn batch(table: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::Batch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the name of the copy unit it came from.
    pub fn in_unit(self, unit: impl Into<String>) -> Self {
        ExtractError::Unit {
            unit: unit.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping any unit context.
    pub fn root(&self) -> &ExtractError {
        match self {
            ExtractError::Unit { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the failed operation could succeed.
    ///
    /// Only connectivity failures qualify; everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), ExtractError::Connection { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            ExtractError::Config(_) | ExtractError::Yaml(_) => EXIT_CONFIG_ERROR,
            ExtractError::Connection { .. } => EXIT_CONNECTION_ERROR,
            ExtractError::SchemaMissing(_) => EXIT_SCHEMA_ERROR,
            ExtractError::Plan(_) => EXIT_PLAN_ERROR,
            ExtractError::Io(_) => EXIT_IO_ERROR,
            _ => EXIT_TRANSFER_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
