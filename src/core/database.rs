//! Database abstraction
//!
//! [`Database`] is the backend seam. Drivers supply the primitives: connect,
//! statement execution, transaction control and schema setup. Everything
//! object-shaped sits on top as provided methods, so the persistence
//! semantics (load-through-cache, dirty-member saves, change set commits,
//! conditional updates, the deferred queue) behave identically on every
//! backend.
//!
//! [`DatabaseExt`] adds the typed convenience surface; it is a blanket
//! extension so `dyn Database` stays object safe.

use crate::core::changeset::{ChangeSet, ExplicitUpdate, Operation, StandardChangeSet};
use crate::core::error::{DatabaseError, Result};
use crate::core::object::{PersistedType, Persistent};
use crate::core::queue::TransactionQueue;
use crate::core::schema::ObjectMetadata;
use crate::core::statement::Statement;
use crate::core::store::ObjectStore;
use crate::core::value::{BindValue, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Result of one transaction queue pass
#[derive(Debug, Default)]
pub struct QueueOutcome {
    /// Change sets committed successfully
    pub committed: usize,
    /// Failures, tagged with the correlation group they belonged to
    pub failures: Vec<(Uuid, DatabaseError)>,
}

impl QueueOutcome {
    /// Whether every drained change set committed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A database holding persisted objects
#[async_trait]
pub trait Database: Send + Sync {
    /// The object store this database loads into and caches through
    fn object_store(&self) -> &Arc<ObjectStore>;

    /// The deferred change set queue
    fn transaction_queue(&self) -> &TransactionQueue;

    /// Open the connection
    async fn connect(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Whether the connection is currently usable
    async fn is_open(&self) -> bool;

    /// Execute a write statement, returning the affected row count
    async fn execute_statement(&self, statement: &Statement) -> Result<u64>;

    /// Execute a read statement, returning materialized rows
    async fn query_statement(&self, statement: &Statement) -> Result<crate::core::statement::RowSet>;

    /// Execute a raw command with no bindings
    ///
    /// Backends without a textual command language return
    /// [`DatabaseError::UnsupportedOperation`].
    async fn execute_raw(&self, command: &str) -> Result<u64>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the open transaction
    async fn commit_transaction(&self) -> Result<()>;

    /// Roll back the open transaction
    async fn rollback_transaction(&self) -> Result<()>;

    /// Quote an identifier for this backend's statement syntax
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{identifier}\"")
    }

    /// Create or repair base storage that exists independent of registered
    /// types
    async fn setup_base(&self) -> Result<()>;

    /// Create or repair the table for one registered type
    ///
    /// Must be idempotent when `rebuild` is unset: verify the live table
    /// against the metadata, leave a matching table untouched, archive and
    /// recreate a mismatched one, and ensure lookup key indexes exist. With
    /// `rebuild` set the table is dropped and recreated unconditionally.
    async fn setup_table(&self, metadata: &'static ObjectMetadata, rebuild: bool) -> Result<()>;

    /// Create or repair storage for every registered type
    async fn setup(&self) -> Result<()> {
        self.setup_base().await?;
        for metadata in self.object_store().registered_metadata() {
            self.setup_table(metadata, false).await?;
        }
        Ok(())
    }

    /// Drop and recreate storage for every registered type
    async fn setup_rebuild(&self) -> Result<()> {
        self.setup_base().await?;
        for metadata in self.object_store().registered_metadata() {
            self.setup_table(metadata, true).await?;
        }
        Ok(())
    }

    /// Whether the backing database (file, schema or keyspace) exists
    async fn database_exists(&self) -> Result<bool>;

    /// Whether storage for the named table exists
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Whether the named table holds at least one row
    async fn table_has_rows(&self, table: &str) -> Result<bool> {
        let statement = Statement::prepare(format!(
            "SELECT * FROM {} LIMIT 1",
            self.quote_identifier(table)
        ));
        Ok(!self.query_statement(&statement).await?.is_empty())
    }

    /// Fetch the raw row for one object, bypassing the cache
    async fn fetch_object_row(
        &self,
        metadata: &'static ObjectMetadata,
        uid: Uuid,
    ) -> Result<Option<crate::core::value::DatabaseRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = :UID",
            self.quote_identifier(metadata.name),
            self.quote_identifier("UID")
        );
        let mut statement = Statement::prepare(sql);
        statement.bind("UID", uid)?;
        let rows = self.query_statement(&statement).await?;
        Ok(rows.into_rows().into_iter().next())
    }

    /// Insert a new row for the object
    ///
    /// Registers the object first, generating a UID when it has none and
    /// entering a preassigned UID into the cache. All members are written;
    /// the changed set clears on success.
    async fn insert_object(&self, object: &Arc<dyn Persistent>) -> Result<()> {
        if object.state().is_deleted() {
            return Err(DatabaseError::ObjectDeleted(object.state().uuid()));
        }
        self.object_store().register_object(object, None)?;
        let metadata = object.metadata();
        let values = object.member_bind_values(true);

        let mut columns = vec![self.quote_identifier("UID")];
        let mut slots = vec![":UID".to_string()];
        for bind in &values {
            columns.push(self.quote_identifier(bind.column()));
            slots.push(format!(":{}", bind.column()));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(metadata.name),
            columns.join(", "),
            slots.join(", ")
        );
        let mut statement = Statement::prepare(sql);
        statement.bind("UID", object.state().uuid())?;
        for bind in &values {
            statement.bind(bind.column(), bind.value().clone())?;
        }

        self.execute_statement(&statement).await?;
        object.state().clear_all_dirty();
        debug!(table = metadata.name, uid = %object.state().uuid(), "inserted object");
        Ok(())
    }

    /// Save the object's changed members
    ///
    /// A no-op when nothing changed. The changed set clears only after the
    /// statement succeeds, so a failed save retries the same members.
    async fn update_object(&self, object: &Arc<dyn Persistent>) -> Result<()> {
        if object.state().is_deleted() {
            return Err(DatabaseError::ObjectDeleted(object.state().uuid()));
        }
        let uid = object.state().uuid();
        if uid.is_nil() {
            return Err(DatabaseError::NotRegistered(uid));
        }
        let values = object.member_bind_values(false);
        if values.is_empty() {
            return Ok(());
        }
        let metadata = object.metadata();
        let saved: std::collections::HashSet<String> =
            values.iter().map(|b| b.column().to_string()).collect();

        let assignments: Vec<String> = values
            .iter()
            .map(|b| format!("{} = :{}", self.quote_identifier(b.column()), b.column()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = :UID",
            self.quote_identifier(metadata.name),
            assignments.join(", "),
            self.quote_identifier("UID")
        );
        let mut statement = Statement::prepare(sql);
        for bind in &values {
            statement.bind(bind.column(), bind.value().clone())?;
        }
        statement.bind("UID", uid)?;

        self.execute_statement(&statement).await?;
        object.state().clear_dirty(&saved);
        debug!(table = metadata.name, uid = %uid, members = saved.len(), "updated object");
        Ok(())
    }

    /// Delete rows for a batch of same-typed objects
    ///
    /// One statement per call; the objects are unregistered (and permanently
    /// marked deleted) on success.
    async fn delete_objects(
        &self,
        metadata: &'static ObjectMetadata,
        objects: &[Arc<dyn Persistent>],
    ) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let slots: Vec<String> = (0..objects.len()).map(|i| format!(":u{i}")).collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.quote_identifier(metadata.name),
            self.quote_identifier("UID"),
            slots.join(", ")
        );
        let mut statement = Statement::prepare(sql);
        for (i, object) in objects.iter().enumerate() {
            statement.bind(&format!("u{i}"), object.state().uuid())?;
        }
        self.execute_statement(&statement).await?;
        for object in objects {
            self.object_store().unregister_object(object);
        }
        debug!(table = metadata.name, count = objects.len(), "deleted objects");
        Ok(())
    }

    /// Apply an expectation-guarded column update
    ///
    /// Succeeds only when exactly one row matched every expectation. Zero
    /// matched rows means another writer got there first and surfaces as
    /// [`DatabaseError::ConcurrentModification`].
    async fn apply_explicit_update(&self, update: &ExplicitUpdate) -> Result<()> {
        let object = update.object();
        let uid = object.state().uuid();
        if uid.is_nil() {
            return Err(DatabaseError::NotRegistered(uid));
        }
        let metadata = object.metadata();
        let changes = update.updates();
        if changes.is_empty() {
            return Ok(());
        }

        let assignments: Vec<String> = changes
            .iter()
            .map(|c| format!("{} = :set_{}", self.quote_identifier(&c.column), c.column))
            .collect();
        let mut conditions = vec![format!("{} = :UID", self.quote_identifier("UID"))];
        for c in changes {
            conditions.push(format!(
                "{} = :exp_{}",
                self.quote_identifier(&c.column),
                c.column
            ));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_identifier(metadata.name),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        let mut statement = Statement::prepare(sql);
        for c in changes {
            statement.bind(&format!("set_{}", c.column), c.new.clone())?;
            statement.bind(&format!("exp_{}", c.column), c.expected.clone())?;
        }
        statement.bind("UID", uid)?;

        match self.execute_statement(&statement).await? {
            1 => Ok(()),
            0 => Err(DatabaseError::ConcurrentModification {
                table: metadata.name.to_string(),
                uid,
            }),
            n => Err(DatabaseError::query(format!(
                "conditional update of {} {uid} touched {n} rows",
                metadata.name
            ))),
        }
    }

    /// Load objects of a registered type, optionally filtered on one column
    ///
    /// Rows whose UID already has a live instance resolve to that instance
    /// untouched; the database never clobbers in-memory state behind a
    /// holder's back.
    async fn load_objects(
        &self,
        metadata: &'static ObjectMetadata,
        filter: Option<&BindValue>,
    ) -> Result<Vec<Arc<dyn Persistent>>> {
        let mut sql = format!("SELECT * FROM {}", self.quote_identifier(metadata.name));
        if let Some(bind) = filter {
            sql.push_str(&format!(
                " WHERE {} = :{}",
                self.quote_identifier(bind.column()),
                bind.column()
            ));
        }
        let mut statement = Statement::prepare(sql);
        if let Some(bind) = filter {
            statement.bind(bind.column(), bind.value().clone())?;
        }

        let rows = self.query_statement(&statement).await?;
        let store = self.object_store();
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows.rows() {
            let uid = row
                .get("UID")
                .and_then(Value::as_uuid)
                .ok_or_else(|| DatabaseError::query("row has no readable UID column"))?;
            if let Some(existing) = store.get_cached(uid) {
                loaded.push(existing);
                continue;
            }
            let object = store.construct_by_name(metadata.name)?;
            object.load_database_values(row)?;
            store.register_object(&object, Some(uid))?;
            loaded.push(object);
        }
        debug!(table = metadata.name, count = loaded.len(), "loaded objects");
        Ok(loaded)
    }

    /// Load one object by UID
    ///
    /// Without `reload`, a live cached instance is returned without touching
    /// the database. With `reload`, the row is always fetched and its values
    /// loaded into the cached instance when one exists, bringing in-memory
    /// state back to the committed row.
    async fn load_object(
        &self,
        metadata: &'static ObjectMetadata,
        uid: Uuid,
        reload: bool,
    ) -> Result<Option<Arc<dyn Persistent>>> {
        if uid.is_nil() {
            return Ok(None);
        }
        let store = self.object_store();
        let cached = store.get_cached(uid);
        if !reload {
            if let Some(ref existing) = cached {
                return Ok(Some(Arc::clone(existing)));
            }
        }
        let row = match self.fetch_object_row(metadata, uid).await? {
            Some(row) => row,
            None => {
                debug!(table = metadata.name, uid = %uid, "no row for requested object");
                return Ok(None);
            }
        };
        if let Some(cached) = cached {
            cached.load_database_values(&row)?;
            cached.state().clear_all_dirty();
            return Ok(Some(cached));
        }
        let object = store.construct_by_name(metadata.name)?;
        object.load_database_values(&row)?;
        store.register_object(&object, Some(uid))?;
        Ok(Some(object))
    }

    /// Commit a change set
    ///
    /// The whole set commits atomically where the backend supports it. On
    /// failure the transaction rolls back; a rollback that itself fails is
    /// reported as [`DatabaseError::RollbackFailed`].
    async fn process_change_set(&self, change_set: ChangeSet) -> Result<()> {
        if change_set.is_empty() {
            return Ok(());
        }
        self.begin_transaction().await?;
        let result = match &change_set {
            ChangeSet::Standard(standard) => self.run_standard(standard).await,
            ChangeSet::Operational(operational) => {
                let mut outcome = Ok(());
                for op in operational.operations() {
                    let step = match op {
                        Operation::Insert(object) => self.insert_object(object).await,
                        Operation::Update(object) => self.update_object(object).await,
                        Operation::Delete(object) => {
                            self.delete_objects(object.metadata(), std::slice::from_ref(object))
                                .await
                        }
                        Operation::Explicit(update) => self.apply_explicit_update(update).await,
                    };
                    if let Err(e) = step {
                        outcome = Err(e);
                        break;
                    }
                }
                outcome
            }
        };

        match result {
            Ok(()) => {
                self.commit_transaction().await?;
                if let ChangeSet::Operational(operational) = &change_set {
                    self.reload_explicit_targets(operational.operations()).await?;
                }
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback_transaction().await {
                    error!(
                        cause = %e,
                        rollback = %rollback_err,
                        "rollback failed after change set error; connection state is unknown"
                    );
                    return Err(DatabaseError::RollbackFailed(rollback_err.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Queue a change set for a later processing pass
    fn queue_change_set(&self, change_set: ChangeSet) {
        self.transaction_queue().queue(change_set);
    }

    /// Queue a single insert under a correlation group
    fn queue_insert(&self, object: Arc<dyn Persistent>, group: Uuid) {
        let mut change_set = ChangeSet::with_group(group);
        change_set.insert(object);
        self.queue_change_set(change_set);
    }

    /// Queue a single update under a correlation group
    fn queue_update(&self, object: Arc<dyn Persistent>, group: Uuid) {
        let mut change_set = ChangeSet::with_group(group);
        change_set.update(object);
        self.queue_change_set(change_set);
    }

    /// Queue a single delete under a correlation group
    fn queue_delete(&self, object: Arc<dyn Persistent>, group: Uuid) {
        let mut change_set = ChangeSet::with_group(group);
        change_set.delete(object);
        self.queue_change_set(change_set);
    }

    /// Drain and commit everything queued so far
    ///
    /// Each change set commits independently; one failure does not stop the
    /// pass. Uncorrelated sets commit before any correlated group.
    async fn process_transaction_queue(&self) -> QueueOutcome {
        let mut outcome = QueueOutcome::default();
        for (group, change_sets) in self.transaction_queue().take_pending() {
            for change_set in change_sets {
                match self.process_change_set(change_set).await {
                    Ok(()) => outcome.committed += 1,
                    Err(e) => {
                        error!(group = %group, error = %e, "queued change set failed");
                        outcome.failures.push((group, e));
                    }
                }
            }
        }
        outcome
    }

    /// Run a standard change set's statements (no transaction control)
    async fn run_standard(&self, standard: &StandardChangeSet) -> Result<()> {
        for object in &standard.inserts {
            self.insert_object(object).await?;
        }
        for object in &standard.updates {
            self.update_object(object).await?;
        }
        let mut by_table: HashMap<&'static str, Vec<Arc<dyn Persistent>>> = HashMap::new();
        for object in &standard.deletes {
            by_table
                .entry(object.metadata().name)
                .or_default()
                .push(Arc::clone(object));
        }
        for (table, objects) in by_table {
            let metadata = self.object_store().metadata_by_name(table)?;
            self.delete_objects(metadata, &objects).await?;
        }
        Ok(())
    }

    /// Reload the targets of explicit updates after their commit
    ///
    /// The conditional write changed rows without going through the
    /// instances, so only a reload brings the in-memory members back in
    /// step. A reload failure cannot un-commit anything, but it leaves
    /// stale members in memory, so it fails the whole operation.
    async fn reload_explicit_targets(&self, operations: &[Operation]) -> Result<()> {
        for op in operations {
            let object = match op {
                Operation::Explicit(update) => update.object(),
                _ => continue,
            };
            let uid = object.state().uuid();
            let metadata = object.metadata();
            match self.fetch_object_row(metadata, uid).await? {
                Some(row) => {
                    object.load_database_values(&row)?;
                    object.state().clear_all_dirty();
                }
                None => {
                    warn!(table = metadata.name, uid = %uid, "updated row vanished before reload");
                    return Err(DatabaseError::query("updated row vanished before reload"));
                }
            }
        }
        Ok(())
    }
}

/// Typed convenience methods over any [`Database`]
#[async_trait]
pub trait DatabaseExt: Database {
    /// Load one object by UID
    async fn retrieve<T: PersistedType>(&self, uid: Uuid) -> Result<Option<Arc<T>>> {
        let metadata = self.object_store().metadata_of::<T>()?;
        Ok(self
            .load_object(metadata, uid, false)
            .await?
            .and_then(|obj| obj.as_any_arc().downcast::<T>().ok()))
    }

    /// Load one object by UID, forcing a fresh read of the committed row
    async fn retrieve_reloaded<T: PersistedType>(&self, uid: Uuid) -> Result<Option<Arc<T>>> {
        let metadata = self.object_store().metadata_of::<T>()?;
        Ok(self
            .load_object(metadata, uid, true)
            .await?
            .and_then(|obj| obj.as_any_arc().downcast::<T>().ok()))
    }

    /// Load every stored object of a type
    async fn retrieve_all<T: PersistedType>(&self) -> Result<Vec<Arc<T>>> {
        let metadata = self.object_store().metadata_of::<T>()?;
        let objects = self.load_objects(metadata, None).await?;
        Ok(downcast_all(objects))
    }

    /// Load objects matching one column value
    async fn retrieve_by<T: PersistedType>(
        &self,
        column: &str,
        value: impl Into<Value> + Send,
    ) -> Result<Vec<Arc<T>>> {
        let metadata = self.object_store().metadata_of::<T>()?;
        let filter = BindValue::new(column, value);
        let objects = self.load_objects(metadata, Some(&filter)).await?;
        Ok(downcast_all(objects))
    }

    /// Load the single object matching one column value
    async fn retrieve_one_by<T: PersistedType>(
        &self,
        column: &str,
        value: impl Into<Value> + Send,
    ) -> Result<Option<Arc<T>>> {
        let mut objects = self.retrieve_by::<T>(column, value).await?;
        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.remove(0))
        })
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}

fn downcast_all<T: PersistedType>(objects: Vec<Arc<dyn Persistent>>) -> Vec<Arc<T>> {
    objects
        .into_iter()
        .filter_map(|obj| obj.as_any_arc().downcast::<T>().ok())
        .collect()
}
