//! # gamedb
//!
//! An asynchronous object persistence layer for game server processes,
//! providing unified access to multiple database backends behind one
//! `Database` trait: register your persistable types once, then load,
//! cache, reference and save them the same way on every backend.
//!
//! ## Features
//!
//! - **Typed objects**: persistable types carry static schema metadata; the
//!   live schema is verified and repaired at setup
//! - **One instance per UID**: loads resolve through a weak cache so every
//!   holder shares the same instance
//! - **Lazy references**: UID-valued members resolve on demand and remember
//!   a failed load
//! - **Change sets**: batched commits with a fixed insert/update/delete
//!   order, or strictly ordered operational sets
//! - **Conditional updates**: expectation-guarded column writes for members
//!   contended across server processes
//! - **Deferred queue**: change sets queued by correlation group and
//!   committed in a single processing pass
//!
//! ## Supported Databases
//!
//! | Database | Feature | Notes |
//! |----------|---------|-------|
//! | SQLite | `sqlite` (default) | Bundled, used by the test suite |
//! | MySQL / MariaDB | `mysql` | Pooled connections |
//! | MongoDB | `mongodb_support` | No statement language, serial change sets |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gamedb::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(ObjectStore::new());
//!     // store.register_type::<Item>() for each persistable type
//!
//!     let db = SqliteDatabase::new(SqliteConfig::new("world.db"), store);
//!     db.connect().await?;
//!     db.setup().await?;
//!
//!     // Raw statements are available on the SQL backends
//!     let mut stmt = Statement::prepare("SELECT * FROM \"objects\" WHERE \"UID\" = :uid");
//!     stmt.bind("uid", uuid::Uuid::nil())?;
//!     let rows = db.query_statement(&stmt).await?;
//!     println!("{} rows", rows.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! Object traffic goes through [`ChangeSet`](core::ChangeSet) values: queue
//! inserts, updates and deletes against live instances, then commit with
//! `process_change_set` or defer with `queue_change_set` and drain the queue
//! with `process_transaction_queue`.
//!
//! ## Project Structure
//!
//! ```text
//! gamedb/
//! ├── src/
//! │   ├── core/              # Backend-independent persistence core
//! │   │   ├── database.rs    # Database trait and shared executor
//! │   │   ├── object.rs      # Persistent trait and object state
//! │   │   ├── store.rs       # Type registry and UUID cache
//! │   │   ├── reference.rs   # Lazy references
//! │   │   ├── changeset.rs   # Change sets and explicit updates
//! │   │   ├── queue.rs       # Deferred change set queue
//! │   │   ├── statement.rs   # Portable statements and result sets
//! │   │   ├── schema.rs      # Type metadata
//! │   │   ├── migration.rs   # Versioned migrations
//! │   │   ├── value.rs       # Column values
//! │   │   ├── error.rs       # Error types
//! │   │   └── mod.rs
//! │   ├── backends/          # Database backend implementations
//! │   └── lib.rs
//! ├── tests/                 # Integration tests
//! └── Cargo.toml
//! ```

/// Backend-independent persistence core
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        BindValue, ChangeSet, ColumnType, Database, DatabaseError, DatabaseExt, DatabaseRow,
        ExplicitUpdate, FieldDef, Migration, MigrationManager, ObjectMetadata, ObjectRef,
        ObjectState, ObjectStore, PersistedType, Persistent, Result, RowSet, Statement,
        TransactionQueue, UpdateOp, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::{SqliteConfig, SqliteDatabase};

    #[cfg(feature = "mysql")]
    pub use crate::backends::{MysqlConfig, MysqlDatabase};

    #[cfg(feature = "mongodb_support")]
    pub use crate::backends::{MongoConfig, MongoDatabase};
}

// Re-export at root level for convenience
pub use crate::core::{
    BindValue, ChangeSet, ColumnType, Database, DatabaseError, DatabaseExt, DatabaseRow,
    ExplicitUpdate, FieldDef, Migration, MigrationManager, ObjectMetadata, ObjectRef, ObjectState,
    ObjectStore, PersistedType, Persistent, QueueOutcome, Result, RowSet, Statement,
    TransactionQueue, UpdateOp, Value,
};

#[cfg(feature = "sqlite")]
pub use backends::{SqliteConfig, SqliteDatabase};

#[cfg(feature = "mysql")]
pub use backends::{MysqlConfig, MysqlDatabase};

#[cfg(feature = "mongodb_support")]
pub use backends::{MongoConfig, MongoDatabase};
