//! Error types for pgrecord

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pgrecord operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for database and record operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// SQL execution failed; carries the driver's error text and the attempted SQL
    #[error("Query failed: {message}\n Query: {sql}")]
    QueryFailed { message: String, sql: String },

    /// A relationship required for a join or inference has no schema metadata
    #[error("Relationship not found: {source_table} -> {target}.{column}")]
    RelationshipNotFound {
        source_table: String,
        target: String,
        column: String,
    },

    /// A `through` join references an alias not listed earlier, or a bare
    /// relationship name is unknown
    #[error("Invalid join: {0}")]
    InvalidJoin(String),

    /// Join descriptor is missing required fields or names an unknown join type
    #[error("Join configuration error: {0}")]
    JoinConfig(String),

    /// Name is neither a column nor a relationship of the table
    #[error("Unknown column [{column}] referenced on table {table}")]
    UnknownColumn { table: String, column: String },

    /// The catalog has no columns for the table
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Supplied record key does not match the table's primary key
    #[error("Invalid record key provided for {table}: expected {expected} key column(s), got {got}")]
    InvalidKey {
        table: String,
        expected: usize,
        got: usize,
    },

    /// The operation needs a primary key and the table has none
    #[error("Table {0} has no primary key")]
    MissingPrimaryKey(String),

    /// Schema cache directory is not configured or does not exist
    #[error("Schema cache directory does not exist: {}", .0.display())]
    CacheDirectoryMissing(PathBuf),

    /// Schema cache entry does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a query failure carrying the SQL that was attempted
    pub fn query_failed(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a relationship-not-found error
    pub fn relationship_not_found(
        source_table: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::RelationshipNotFound {
            source_table: source_table.into(),
            target: target.into(),
            column: column.into(),
        }
    }

    /// Check if this is a query failure
    pub fn is_query_failed(&self) -> bool {
        matches!(self, Self::QueryFailed { .. })
    }

    /// Check if this is an unknown column error
    pub fn is_unknown_column(&self) -> bool {
        matches!(self, Self::UnknownColumn { .. })
    }

    /// Check if this is a key mismatch error
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }

    /// Check if this is a join or relationship resolution error
    pub fn is_join_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidJoin(_) | Self::JoinConfig(_) | Self::RelationshipNotFound { .. }
        )
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Map a tokio_postgres error raised while running `sql`
    pub fn from_db_error(err: tokio_postgres::Error, sql: &str) -> Self {
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        let message = match err.as_db_error() {
            Some(db_err) => db_err.message().to_string(),
            None => err.to_string(),
        };
        Self::query_failed(message, sql)
    }
}

impl From<std::io::Error> for OrmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
