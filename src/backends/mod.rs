//! Backend implementations of the [`Database`](crate::core::Database) trait

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mongodb_support")]
pub mod mongodb;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteDatabase};

#[cfg(feature = "mysql")]
pub use mysql::{MysqlConfig, MysqlDatabase};

#[cfg(feature = "mongodb_support")]
pub use mongodb::{MongoConfig, MongoDatabase};
