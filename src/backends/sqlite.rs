//! SQLite backend
//!
//! Runs everything on a single shared connection behind an async mutex,
//! offloading the blocking rusqlite calls to the blocking thread pool with a
//! timeout. An open transaction holds the session exclusively: statements
//! from the task that began it run inside it, every other caller waits for
//! the transaction to end. The development and single-process deployment
//! backend; it is the one exercised by the test suite.

use crate::core::{
    database::Database,
    error::{DatabaseError, Result},
    queue::TransactionQueue,
    schema::{ColumnType, ObjectMetadata},
    statement::{RowSet, Statement},
    store::ObjectStore,
    value::{DatabaseRow, Value},
};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite connection settings
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`
    pub path: String,
}

impl SqliteConfig {
    /// Settings for a file-backed database
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Settings for an in-memory database
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }
}

/// An open transaction: the task that began it plus the session permit it
/// holds until commit or rollback
struct TransactionOwner {
    task: Option<tokio::task::Id>,
    _permit: OwnedSemaphorePermit,
}

/// SQLite-backed object database
pub struct SqliteDatabase {
    config: SqliteConfig,
    connection: Arc<Mutex<Option<Connection>>>,
    session: Arc<Semaphore>,
    txn_owner: parking_lot::Mutex<Option<TransactionOwner>>,
    store: Arc<ObjectStore>,
    queue: TransactionQueue,
}

impl SqliteDatabase {
    /// Create an unconnected instance over a shared object store
    pub fn new(config: SqliteConfig, store: Arc<ObjectStore>) -> Self {
        Self {
            config,
            connection: Arc::new(Mutex::new(None)),
            session: Arc::new(Semaphore::new(1)),
            txn_owner: parking_lot::Mutex::new(None),
            store,
            queue: TransactionQueue::new(),
        }
    }

    /// Whether the caller's task holds the open transaction
    ///
    /// `try_id` is `None` on a runtime's root context (`block_on`); two
    /// `None`s match, so a transaction begun there still owns its
    /// statements.
    fn owns_transaction(&self) -> bool {
        match self.txn_owner.lock().as_ref() {
            Some(owner) => owner.task == tokio::task::try_id(),
            None => false,
        }
    }

    async fn acquire_session(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.session)
            .acquire_owned()
            .await
            .map_err(|_| DatabaseError::connection("session closed"))
    }

    /// Run one statement on the shared session
    ///
    /// The transaction owner runs inside its open transaction; everyone
    /// else waits for the session, so a lone statement can never land
    /// inside a foreign transaction.
    async fn run_exclusive<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        if self.owns_transaction() {
            return self.run_blocking(f).await;
        }
        let _permit = self.acquire_session().await?;
        self.run_blocking(f).await
    }

    /// Run a blocking closure against the open connection with a timeout
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);
        let mut task = tokio::task::spawn_blocking(move || -> Result<T> {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("not connected to database"))?;
            f(conn)
        });

        // Abort the task on timeout so the blocking slot is reclaimed
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("task join error: {e}")))?
            }
            _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
                task.abort();
                Err(DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))
            }
        }
    }

    /// Convert a rusqlite row to a column map
    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        let column_count = row.as_ref().column_count();
        for i in 0..column_count {
            let column_name = row.as_ref().column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(v) => Value::BigInt(v),
                rusqlite::types::ValueRef::Real(v) => Value::Double(v),
                rusqlite::types::ValueRef::Text(v) => {
                    Value::Text(String::from_utf8_lossy(v).to_string())
                }
                rusqlite::types::ValueRef::Blob(v) => Value::Blob(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }
        Ok(db_row)
    }

    /// Convert a bound value to a rusqlite parameter
    fn value_to_param(value: &Value) -> Box<dyn rusqlite::ToSql> {
        match value {
            Value::Null => Box::new(None::<i64>),
            Value::Bool(v) => Box::new(*v),
            Value::Int(v) => Box::new(*v),
            Value::BigInt(v) => Box::new(*v),
            Value::Float(v) => Box::new(*v as f64),
            Value::Double(v) => Box::new(*v),
            Value::Text(v) => Box::new(v.clone()),
            Value::Blob(v) => Box::new(v.clone()),
            Value::Uuid(v) => Box::new(v.to_string()),
        }
    }

    /// Rewrite a portable statement to SQLite's positional form
    ///
    /// Returns the rewritten SQL plus one parameter per placeholder
    /// occurrence (a named slot used twice binds twice).
    fn translate(statement: &Statement) -> Result<(String, Vec<Value>)> {
        let values = statement.bound_values()?;
        let mut params = Vec::new();
        let sql = statement.text_with_placeholders(|idx| {
            params.push(values[idx].clone());
            "?".to_string()
        });
        Ok((sql, params))
    }

    fn declared_type(column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Text => "text",
            ColumnType::Blob => "blob",
            ColumnType::Uuid => "varchar(36)",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Bool => "bool",
        }
    }

    fn accepted_types(column_type: ColumnType) -> &'static [&'static str] {
        match column_type {
            ColumnType::Text => &["text", "varchar"],
            ColumnType::Blob => &["blob"],
            ColumnType::Uuid => &["varchar", "text"],
            ColumnType::Int => &["int", "integer"],
            ColumnType::BigInt => &["bigint", "integer"],
            ColumnType::Float => &["float", "real"],
            ColumnType::Double => &["double", "real"],
            ColumnType::Bool => &["bool", "boolean", "int", "integer"],
        }
    }

    /// Columns of the live table as (name, declared type), empty when the
    /// table does not exist
    async fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let statement = Statement::prepare(format!("PRAGMA table_info({})", self.quote_identifier(table)));
        let rows = self.query_statement(&statement).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows.rows() {
            let name = row
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| DatabaseError::query("table_info row missing name"))?
                .to_string();
            let declared = row
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            columns.push((name, declared));
        }
        Ok(columns)
    }

    fn schema_matches(metadata: &ObjectMetadata, live: &[(String, String)]) -> bool {
        if live.len() != metadata.fields.len() + 1 {
            return false;
        }
        let uid_ok = live.iter().any(|(name, declared)| {
            name == "UID" && crate::core::schema::type_matches(declared, &["varchar", "text"])
        });
        if !uid_ok {
            return false;
        }
        metadata.fields.iter().all(|field| {
            live.iter().any(|(name, declared)| {
                name == field.name
                    && crate::core::schema::type_matches(declared, Self::accepted_types(field.column_type))
            })
        })
    }

    async fn create_table(&self, metadata: &ObjectMetadata) -> Result<()> {
        let mut columns = vec![format!("{} varchar(36) PRIMARY KEY", self.quote_identifier("UID"))];
        for field in metadata.fields {
            columns.push(format!(
                "{} {}",
                self.quote_identifier(field.name),
                Self::declared_type(field.column_type)
            ));
        }
        let sql = format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(metadata.name),
            columns.join(", ")
        );
        self.execute_raw(&sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn object_store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    fn transaction_queue(&self) -> &TransactionQueue {
        &self.queue
    }

    async fn connect(&self) -> Result<()> {
        // Drop any existing connection and stale transaction state first
        {
            let mut connection = self.connection.lock().await;
            *connection = None;
        }
        *self.txn_owner.lock() = None;

        let path = self.config.path.clone();
        let connection_arc = Arc::clone(&self.connection);
        let mut task = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            let mut connection = connection_arc.blocking_lock();
            *connection = Some(conn);
            Ok(())
        });

        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("task join error: {e}")))??;
            }
            _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
                task.abort();
                return Err(DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.txn_owner.lock() = None;
        let mut connection = self.connection.lock().await;
        *connection = None;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.connection
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn execute_statement(&self, statement: &Statement) -> Result<u64> {
        let (sql, params) = Self::translate(statement)?;
        self.run_exclusive(move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(Self::value_to_param).collect();
            let mut stmt = conn.prepare(&sql)?;
            let affected = stmt.execute(params_from_iter(rusqlite_params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn query_statement(&self, statement: &Statement) -> Result<RowSet> {
        let (sql, params) = Self::translate(statement)?;
        self.run_exclusive(move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(Self::value_to_param).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(rusqlite_params.iter()),
                Self::row_to_database_row,
            )?;
            let mut results = Vec::new();
            for row_result in rows {
                results.push(row_result?);
            }
            Ok(RowSet::new(results))
        })
        .await
    }

    async fn execute_raw(&self, command: &str) -> Result<u64> {
        let command = command.to_string();
        self.run_exclusive(move |conn| {
            let affected = conn.execute(&command, [])?;
            Ok(affected as u64)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.owns_transaction() {
            return Err(DatabaseError::transaction("already in a transaction"));
        }
        // Waiting for the permit also waits out any statement in flight
        let permit = self.acquire_session().await?;
        self.run_blocking(|conn| {
            conn.execute("BEGIN TRANSACTION", [])?;
            Ok(())
        })
        .await?;
        *self.txn_owner.lock() = Some(TransactionOwner {
            task: tokio::task::try_id(),
            _permit: permit,
        });
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        if self.txn_owner.lock().is_none() {
            return Err(DatabaseError::transaction("not in a transaction"));
        }
        let committed = self
            .run_blocking(|conn| {
                conn.execute("COMMIT", [])?;
                Ok(())
            })
            .await;
        match committed {
            Ok(()) => {
                *self.txn_owner.lock() = None;
                Ok(())
            }
            Err(commit_err) => {
                // A failed COMMIT leaves the transaction open; roll it back
                // so the session is usable again
                let rolled_back = self
                    .run_blocking(|conn| {
                        conn.execute("ROLLBACK", [])?;
                        Ok(())
                    })
                    .await;
                *self.txn_owner.lock() = None;
                match rolled_back {
                    Ok(()) => Err(commit_err),
                    Err(e) => {
                        error!(
                            commit = %commit_err,
                            rollback = %e,
                            "rollback failed after failed commit; connection state is unknown"
                        );
                        Err(DatabaseError::RollbackFailed(e.to_string()))
                    }
                }
            }
        }
    }

    async fn rollback_transaction(&self) -> Result<()> {
        if self.txn_owner.lock().is_none() {
            return Err(DatabaseError::transaction("not in a transaction"));
        }
        let result = self
            .run_blocking(|conn| {
                conn.execute("ROLLBACK", [])?;
                Ok(())
            })
            .await;
        *self.txn_owner.lock() = None;
        result
    }

    async fn setup_base(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} varchar(36) PRIMARY KEY, {} blob)",
            self.quote_identifier("objects"),
            self.quote_identifier("UID"),
            self.quote_identifier("MemberVars")
        );
        self.execute_raw(&sql).await?;
        Ok(())
    }

    async fn database_exists(&self) -> Result<bool> {
        if self.config.path == ":memory:" {
            return Ok(self.is_open().await);
        }
        Ok(std::path::Path::new(&self.config.path).exists())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(!self.table_columns(table).await?.is_empty())
    }

    async fn setup_table(&self, metadata: &'static ObjectMetadata, rebuild: bool) -> Result<()> {
        let live = self.table_columns(metadata.name).await?;
        if live.is_empty() {
            self.create_table(metadata).await?;
        } else if rebuild || !Self::schema_matches(metadata, &live) {
            if !rebuild {
                warn!(table = metadata.name, "schema mismatch; dropping and recreating table");
            }
            self.execute_raw(&format!("DROP TABLE {}", self.quote_identifier(metadata.name)))
                .await?;
            self.create_table(metadata).await?;
        }

        for field in metadata.lookup_keys() {
            let unique = if field.unique { "UNIQUE " } else { "" };
            let sql = format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
                self.quote_identifier(&format!("idx_{}_{}", metadata.name, field.name)),
                self.quote_identifier(metadata.name),
                self.quote_identifier(field.name)
            );
            self.execute_raw(&sql).await?;
        }
        Ok(())
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        // Best-effort rollback of an open transaction; Drop cannot be async
        if self.txn_owner.lock().is_some() {
            if let Ok(connection) = self.connection.try_lock() {
                if let Some(conn) = connection.as_ref() {
                    let _ = conn.execute("ROLLBACK", []);
                }
            }
        }
    }
}
