//! Backend-independent persistence core

pub mod changeset;
pub mod database;
pub mod error;
pub mod migration;
pub mod object;
pub mod queue;
pub mod reference;
pub mod schema;
pub mod statement;
pub mod store;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use changeset::{ChangeSet, ColumnUpdate, ExplicitUpdate, Operation, UpdateOp};
pub use database::{Database, DatabaseExt, QueueOutcome};
pub use error::{DatabaseError, Result};
pub use migration::{Migration, MigrationManager};
pub use object::{ObjectState, PersistedType, Persistent};
pub use queue::TransactionQueue;
pub use reference::{ObjectRef, RefData};
pub use schema::{ColumnType, FieldDef, ObjectMetadata};
pub use statement::{FromValue, RowSet, Statement};
pub use store::ObjectStore;
pub use value::{BindValue, DatabaseRow, Value};
