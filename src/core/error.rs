//! Error types for the persistence layer
//!
//! This module defines all error types that can occur during database and
//! object-cache operations.

use uuid::Uuid;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database and object-store operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection error (open/use failure)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Statement preparation failure (malformed text, bad parameter syntax)
    #[error("Statement preparation error: {0}")]
    PrepareError(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Bind or column read against the wrong declared type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Column not present in a result row
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Object type has not been registered with the object store
    #[error("Unregistered object type: {0}")]
    UnregisteredType(String),

    /// A live instance with this UUID already exists in the cache
    #[error("Duplicate object detected: {0}")]
    DuplicateUuid(Uuid),

    /// Operation requires a registered object (valid self reference)
    #[error("Object is not registered: {0}")]
    NotRegistered(Uuid),

    /// Operation attempted on an object already deleted from the database
    #[error("Object has been deleted: {0}")]
    ObjectDeleted(Uuid),

    /// An explicit update affected zero rows: the expected precondition no
    /// longer holds. This is a normal outcome, not an I/O failure.
    #[error("Concurrent modification of '{table}' record {uid}")]
    ConcurrentModification { table: String, uid: Uuid },

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Rollback failed; backend state is unknown relative to memory
    #[error("Rollback failed, backend state unknown: {0}")]
    RollbackFailed(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// MySQL error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MysqlError(#[from] mysql_async::Error),

    /// MongoDB error
    #[cfg(feature = "mongodb_support")]
    #[error("MongoDB error: {0}")]
    MongodbError(#[from] mongodb::error::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a new statement preparation error
    pub fn prepare<S: Into<String>>(msg: S) -> Self {
        DatabaseError::PrepareError(msg.into())
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a new migration error
    pub fn migration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Migration(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// True when the error only signals a failed compare-and-swap
    /// precondition, which callers may retry or reconcile.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, DatabaseError::ConcurrentModification { .. })
    }

    /// True when the backend could not roll back and its state can no
    /// longer be reasoned about from memory.
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, DatabaseError::RollbackFailed(_))
    }
}
