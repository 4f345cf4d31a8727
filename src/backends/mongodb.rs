//! MongoDB backend
//!
//! Stores each persisted type in a collection of flat documents keyed by
//! `_id` = UID. There is no textual statement language here, so the
//! statement entry points refuse and every object-level operation is
//! overridden to speak documents directly. Change sets run serially without
//! a surrounding transaction; conditional updates keep their guarantees
//! because `find_one_and_update` is atomic per document.

use crate::core::{
    changeset::ExplicitUpdate,
    database::Database,
    error::{DatabaseError, Result},
    object::Persistent,
    queue::TransactionQueue,
    schema::ObjectMetadata,
    statement::{RowSet, Statement},
    store::ObjectStore,
    value::{BindValue, DatabaseRow, Value},
};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, IndexModel};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// MongoDB connection settings
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection URI (`mongodb://host:port`)
    pub uri: String,
    /// Database name
    pub database: String,
}

impl MongoConfig {
    /// Settings from a URI and database name
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
        }
    }
}

/// MongoDB-backed object database
pub struct MongoDatabase {
    config: MongoConfig,
    client: Mutex<Option<Client>>,
    store: Arc<ObjectStore>,
    queue: TransactionQueue,
}

impl MongoDatabase {
    /// Create an unconnected instance over a shared object store
    pub fn new(config: MongoConfig, store: Arc<ObjectStore>) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            store,
            queue: TransactionQueue::new(),
        }
    }

    async fn database(&self) -> Result<mongodb::Database> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("not connected to database"))?;
        Ok(client.database(&self.config.database))
    }

    fn value_to_bson(value: &Value) -> Bson {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(v) => Bson::Boolean(*v),
            Value::Int(v) => Bson::Int32(*v),
            Value::BigInt(v) => Bson::Int64(*v),
            Value::Float(v) => Bson::Double(*v as f64),
            Value::Double(v) => Bson::Double(*v),
            Value::Text(v) => Bson::String(v.clone()),
            Value::Uuid(v) => Bson::String(v.to_string()),
            Value::Blob(v) => Bson::Binary(mongodb::bson::Binary {
                subtype: mongodb::bson::spec::BinarySubtype::Generic,
                bytes: v.clone(),
            }),
        }
    }

    fn bson_to_value(bson: &Bson) -> Value {
        match bson {
            Bson::Null => Value::Null,
            Bson::Boolean(v) => Value::Bool(*v),
            Bson::Int32(v) => Value::Int(*v),
            Bson::Int64(v) => Value::BigInt(*v),
            Bson::Double(v) => Value::Double(*v),
            Bson::String(v) => Value::Text(v.clone()),
            Bson::Binary(v) => Value::Blob(v.bytes.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    fn document_to_row(document: &Document) -> DatabaseRow {
        let mut row = DatabaseRow::new();
        for (key, bson) in document {
            let column = if key == "_id" { "UID" } else { key.as_str() };
            row.insert(column.to_string(), Self::bson_to_value(bson));
        }
        row
    }

    fn member_document(object: &Arc<dyn Persistent>, retrieve_all: bool) -> Document {
        let mut document = Document::new();
        for bind in object.member_bind_values(retrieve_all) {
            document.insert(bind.column().to_string(), Self::value_to_bson(bind.value()));
        }
        document
    }

    fn uid_filter(uid: Uuid) -> Document {
        doc! { "_id": uid.to_string() }
    }
}

#[async_trait]
impl Database for MongoDatabase {
    fn object_store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    fn transaction_queue(&self) -> &TransactionQueue {
        &self.queue
    }

    async fn connect(&self) -> Result<()> {
        let client = Client::with_uri_str(&self.config.uri).await?;
        client
            .database(&self.config.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.client.lock().await = None;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.client
            .try_lock()
            .map(|client| client.is_some())
            .unwrap_or(false)
    }

    async fn execute_statement(&self, _statement: &Statement) -> Result<u64> {
        Err(DatabaseError::unsupported(
            "this backend has no statement language",
        ))
    }

    async fn query_statement(&self, _statement: &Statement) -> Result<RowSet> {
        Err(DatabaseError::unsupported(
            "this backend has no statement language",
        ))
    }

    async fn execute_raw(&self, _command: &str) -> Result<u64> {
        Err(DatabaseError::unsupported(
            "this backend has no statement language",
        ))
    }

    // Change sets run serially without an enclosing transaction on this
    // backend; a mid-set failure leaves the earlier operations applied.
    async fn begin_transaction(&self) -> Result<()> {
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        Ok(())
    }

    async fn setup_base(&self) -> Result<()> {
        let db = self.database().await?;
        let existing = db.list_collection_names().await?;
        if !existing.iter().any(|name| name == "objects") {
            db.create_collection("objects").await?;
        }
        Ok(())
    }

    async fn database_exists(&self) -> Result<bool> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("not connected to database"))?;
        let names = client.list_database_names().await?;
        Ok(names.iter().any(|name| name == &self.config.database))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let db = self.database().await?;
        let names = db.list_collection_names().await?;
        Ok(names.iter().any(|name| name == table))
    }

    async fn table_has_rows(&self, table: &str) -> Result<bool> {
        let db = self.database().await?;
        let found = db
            .collection::<Document>(table)
            .find_one(Document::new())
            .await?;
        Ok(found.is_some())
    }

    async fn fetch_object_row(
        &self,
        metadata: &'static ObjectMetadata,
        uid: Uuid,
    ) -> Result<Option<DatabaseRow>> {
        let db = self.database().await?;
        let document = db
            .collection::<Document>(metadata.name)
            .find_one(Self::uid_filter(uid))
            .await?;
        Ok(document.as_ref().map(Self::document_to_row))
    }

    async fn setup_table(&self, metadata: &'static ObjectMetadata, rebuild: bool) -> Result<()> {
        let db = self.database().await?;
        let existing = db.list_collection_names().await?;
        let present = existing.iter().any(|name| name == metadata.name);
        if present && rebuild {
            db.collection::<Document>(metadata.name).drop().await?;
        }
        if !present || rebuild {
            db.create_collection(metadata.name).await?;
        }
        let collection = db.collection::<Document>(metadata.name);
        for field in metadata.lookup_keys() {
            let index = IndexModel::builder()
                .keys(doc! { field.name: 1 })
                .options(
                    IndexOptions::builder()
                        .name(format!("idx_{}_{}", metadata.name, field.name))
                        .unique(field.unique)
                        .build(),
                )
                .build();
            collection.create_index(index).await?;
        }
        Ok(())
    }

    async fn insert_object(&self, object: &Arc<dyn Persistent>) -> Result<()> {
        if object.state().is_deleted() {
            return Err(DatabaseError::ObjectDeleted(object.state().uuid()));
        }
        self.store.register_object(object, None)?;
        let metadata = object.metadata();
        let mut document = Self::member_document(object, true);
        document.insert("_id", object.state().uuid().to_string());

        let db = self.database().await?;
        db.collection::<Document>(metadata.name)
            .insert_one(document)
            .await?;
        object.state().clear_all_dirty();
        debug!(table = metadata.name, uid = %object.state().uuid(), "inserted object");
        Ok(())
    }

    async fn update_object(&self, object: &Arc<dyn Persistent>) -> Result<()> {
        if object.state().is_deleted() {
            return Err(DatabaseError::ObjectDeleted(object.state().uuid()));
        }
        let uid = object.state().uuid();
        if uid.is_nil() {
            return Err(DatabaseError::NotRegistered(uid));
        }
        let changed = Self::member_document(object, false);
        if changed.is_empty() {
            return Ok(());
        }
        let saved: std::collections::HashSet<String> =
            changed.keys().map(|k| k.to_string()).collect();
        let metadata = object.metadata();

        let db = self.database().await?;
        db.collection::<Document>(metadata.name)
            .update_one(Self::uid_filter(uid), doc! { "$set": changed })
            .await?;
        object.state().clear_dirty(&saved);
        Ok(())
    }

    async fn delete_objects(
        &self,
        metadata: &'static ObjectMetadata,
        objects: &[Arc<dyn Persistent>],
    ) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let uids: Vec<String> = objects
            .iter()
            .map(|o| o.state().uuid().to_string())
            .collect();
        let db = self.database().await?;
        db.collection::<Document>(metadata.name)
            .delete_many(doc! { "_id": { "$in": uids } })
            .await?;
        for object in objects {
            self.store.unregister_object(object);
        }
        debug!(table = metadata.name, count = objects.len(), "deleted objects");
        Ok(())
    }

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

        let mut filter = Self::uid_filter(uid);
        let mut set = Document::new();
        for change in changes {
            filter.insert(change.column.clone(), Self::value_to_bson(&change.expected));
            set.insert(change.column.clone(), Self::value_to_bson(&change.new));
        }

        let db = self.database().await?;
        let updated = db
            .collection::<Document>(metadata.name)
            .find_one_and_update(filter, doc! { "$set": set })
            .await?;
        match updated {
            Some(_) => Ok(()),
            None => Err(DatabaseError::ConcurrentModification {
                table: metadata.name.to_string(),
                uid,
            }),
        }
    }

    async fn load_objects(
        &self,
        metadata: &'static ObjectMetadata,
        filter: Option<&BindValue>,
    ) -> Result<Vec<Arc<dyn Persistent>>> {
        let query = match filter {
            Some(bind) if bind.column() == "UID" => {
                let uid = bind
                    .value()
                    .as_uuid()
                    .ok_or_else(|| DatabaseError::query("UID filter is not a UUID"))?;
                Self::uid_filter(uid)
            }
            Some(bind) => {
                let mut query = Document::new();
                query.insert(bind.column().to_string(), Self::value_to_bson(bind.value()));
                query
            }
            None => Document::new(),
        };

        let db = self.database().await?;
        let mut cursor = db.collection::<Document>(metadata.name).find(query).await?;
        let mut loaded = Vec::new();
        while cursor.advance().await? {
            let document = cursor.deserialize_current()?;
            let row = Self::document_to_row(&document);
            let uid = row
                .get("UID")
                .and_then(Value::as_uuid)
                .ok_or_else(|| DatabaseError::query("document has no readable _id"))?;
            if let Some(existing) = self.store.get_cached(uid) {
                loaded.push(existing);
                continue;
            }
            let object = self.store.construct_by_name(metadata.name)?;
            object.load_database_values(&row)?;
            self.store.register_object(&object, Some(uid))?;
            loaded.push(object);
        }
        debug!(table = metadata.name, count = loaded.len(), "loaded objects");
        Ok(loaded)
    }
}
