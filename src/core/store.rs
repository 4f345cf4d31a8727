//! Object registry and UUID cache
//!
//! The [`ObjectStore`] owns the process-wide bookkeeping for persistable
//! objects: the table of registered types (keyed both by `TypeId` and by
//! type name), the cache of live instances keyed by UID, and the shared
//! reference records lazy references attach to. The cache holds weak
//! pointers only; an object nothing else retains is dropped normally and its
//! cache slot is pruned on the next hit.
//!
//! A store is an explicit value. Callers share one via `Arc` and hand it to
//! each database they open; nothing here is process-global.

use crate::core::error::{DatabaseError, Result};
use crate::core::object::{PersistedType, Persistent};
use crate::core::reference::RefData;
use crate::core::schema::ObjectMetadata;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error};
use uuid::Uuid;

type Constructor = fn() -> Arc<dyn Persistent>;

struct TypeRegistration {
    metadata: &'static ObjectMetadata,
    construct: Constructor,
}

/// Registry of persistable types plus the live-object cache
#[derive(Default)]
pub struct ObjectStore {
    types: RwLock<HashMap<TypeId, Arc<TypeRegistration>>>,
    types_by_name: RwLock<HashMap<&'static str, Arc<TypeRegistration>>>,
    cache: RwLock<HashMap<Uuid, Weak<dyn Persistent>>>,
    refs: RwLock<HashMap<Uuid, Arc<RefData>>>,
}

impl ObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistable type
    ///
    /// Idempotent; registering the same type twice is a no-op. Backends
    /// refuse to set up or load types that were never registered.
    pub fn register_type<T: PersistedType>(&self) {
        fn build<T: PersistedType>() -> Arc<dyn Persistent> {
            T::construct()
        }
        let registration = Arc::new(TypeRegistration {
            metadata: T::METADATA,
            construct: build::<T>,
        });
        self.types
            .write()
            .insert(TypeId::of::<T>(), Arc::clone(&registration));
        self.types_by_name
            .write()
            .insert(T::METADATA.name, registration);
        debug!(type_name = T::METADATA.name, "registered persistable type");
    }

    /// Metadata for a registered type
    pub fn metadata_of<T: PersistedType>(&self) -> Result<&'static ObjectMetadata> {
        self.types
            .read()
            .get(&TypeId::of::<T>())
            .map(|r| r.metadata)
            .ok_or_else(|| DatabaseError::UnregisteredType(std::any::type_name::<T>().to_string()))
    }

    /// Metadata for a registered type, by name
    pub fn metadata_by_name(&self, name: &str) -> Result<&'static ObjectMetadata> {
        self.types_by_name
            .read()
            .get(name)
            .map(|r| r.metadata)
            .ok_or_else(|| DatabaseError::UnregisteredType(name.to_string()))
    }

    /// All registered type metadata, in no particular order
    pub fn registered_metadata(&self) -> Vec<&'static ObjectMetadata> {
        self.types.read().values().map(|r| r.metadata).collect()
    }

    /// Construct a blank instance of a registered type by name
    pub fn construct_by_name(&self, name: &str) -> Result<Arc<dyn Persistent>> {
        let registration = self
            .types_by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnregisteredType(name.to_string()))?;
        Ok((registration.construct)())
    }

    /// Register a live object in the cache
    ///
    /// Assigns `uuid` when given, keeps the object's existing UID when it
    /// already has one, and generates a random UID otherwise. When the
    /// assigned UID differs from a UID the object previously held, the old
    /// cache slot is released first. Fails without touching the cache if the
    /// object was deleted or a different live instance already owns the UID.
    pub fn register_object(
        &self,
        object: &Arc<dyn Persistent>,
        uuid: Option<Uuid>,
    ) -> Result<Uuid> {
        if object.state().is_deleted() {
            return Err(DatabaseError::ObjectDeleted(object.state().uuid()));
        }

        let previous = object.state().uuid();
        let uuid = match uuid {
            Some(u) if !u.is_nil() => u,
            _ => {
                if previous.is_nil() {
                    Uuid::new_v4()
                } else {
                    previous
                }
            }
        };

        let mut cache = self.cache.write();
        if let Some(existing) = cache.get(&uuid).and_then(Weak::upgrade) {
            if !Arc::ptr_eq(&existing, object) {
                error!(uid = %uuid, "attempted to register a second live object with the same UID");
                return Err(DatabaseError::DuplicateUuid(uuid));
            }
            return Ok(uuid);
        }

        // A re-registration under a new UID vacates the old slot, but only
        // when the slot still points at this instance (a copy sharing the
        // old UID keeps it).
        if !previous.is_nil() && previous != uuid {
            if let Some(old) = cache.get(&previous) {
                if old.upgrade().map_or(true, |o| Arc::ptr_eq(&o, object)) {
                    cache.remove(&previous);
                }
            }
        }

        object.state().set_uuid(uuid);
        cache.insert(uuid, Arc::downgrade(object));
        Ok(uuid)
    }

    /// Remove an object from the cache and mark it deleted
    ///
    /// The deletion mark is permanent; the instance cannot be re-registered.
    pub fn unregister_object(&self, object: &Arc<dyn Persistent>) {
        object.state().mark_deleted();
        let uuid = object.state().uuid();
        if uuid.is_nil() {
            return;
        }
        let mut cache = self.cache.write();
        if let Some(cached) = cache.get(&uuid) {
            let same = cached.upgrade().map_or(true, |c| Arc::ptr_eq(&c, object));
            if same {
                cache.remove(&uuid);
            }
        }
    }

    /// Fetch the live instance for a UID, if one exists
    ///
    /// Prunes the slot when the cached instance has already been dropped.
    pub fn get_cached(&self, uuid: Uuid) -> Option<Arc<dyn Persistent>> {
        {
            let cache = self.cache.read();
            match cache.get(&uuid) {
                Some(weak) => {
                    if let Some(obj) = weak.upgrade() {
                        return Some(obj);
                    }
                }
                None => return None,
            }
        }
        self.cache.write().remove(&uuid);
        None
    }

    /// Fetch the live instance for a UID as a concrete type
    ///
    /// Returns None when nothing is cached or the cached instance is of a
    /// different type.
    pub fn get_cached_as<T: PersistedType>(&self, uuid: Uuid) -> Option<Arc<T>> {
        self.get_cached(uuid)
            .and_then(|obj| obj.as_any_arc().downcast::<T>().ok())
    }

    /// Shared reference record for a UID
    ///
    /// Every lazy reference to the same UID attaches to the same record, so
    /// a load (or a load failure) is observed by all of them.
    pub fn ref_data(&self, uuid: Uuid) -> Arc<RefData> {
        if let Some(data) = self.refs.read().get(&uuid) {
            return Arc::clone(data);
        }
        let mut refs = self.refs.write();
        Arc::clone(
            refs.entry(uuid)
                .or_insert_with(|| Arc::new(RefData::new(uuid))),
        )
    }

    /// Drop a reference record once only the map still holds it
    ///
    /// Called by a lazy reference on drop with its own handle still alive,
    /// so a count of two means no other reference remains.
    pub fn release_ref_data(&self, data: &Arc<RefData>) {
        if Arc::strong_count(data) > 2 {
            return;
        }
        let mut refs = self.refs.write();
        // Re-check under the write lock: a handle cloned out of the map
        // after the first check keeps the record live, and the map slot may
        // already belong to a successor record.
        let still_last = refs
            .get(&data.uuid())
            .map_or(false, |entry| Arc::ptr_eq(entry, data))
            && Arc::strong_count(data) <= 2;
        if still_last {
            refs.remove(&data.uuid());
        }
    }

    /// Number of live entries in the cache (for diagnostics)
    pub fn cached_count(&self) -> usize {
        self.cache
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("types", &self.types.read().len())
            .field("cached", &self.cache.read().len())
            .field("refs", &self.refs.read().len())
            .finish()
    }
}
