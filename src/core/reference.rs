//! Lazy typed references between persisted objects
//!
//! An [`ObjectRef`] stands in for a UID-valued member: it resolves to the
//! live instance when one is cached, loads from the database on demand, and
//! remembers a failed load so the same missing row is not fetched again.
//! All references to the same UID share one [`RefData`] record through the
//! store, so a load performed through any of them is visible to all.

use crate::core::database::Database;
use crate::core::error::Result;
use crate::core::object::{PersistedType, Persistent};
use crate::core::store::ObjectStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Shared per-UID reference record
///
/// Holds a weak pointer to the resolved instance and the sticky load-failure
/// flag. The store keeps one record per referenced UID and drops it when the
/// last reference lets go.
#[derive(Debug)]
pub struct RefData {
    uuid: Uuid,
    pointer: RwLock<Option<Weak<dyn Persistent>>>,
    load_failed: AtomicBool,
}

impl RefData {
    /// New record for a UID, unresolved
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            pointer: RwLock::new(None),
            load_failed: AtomicBool::new(false),
        }
    }

    /// The referenced UID
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The resolved instance, if still alive
    pub fn current(&self) -> Option<Arc<dyn Persistent>> {
        self.pointer.read().as_ref().and_then(Weak::upgrade)
    }

    /// Record a resolved instance
    pub fn set_current(&self, object: &Arc<dyn Persistent>) {
        *self.pointer.write() = Some(Arc::downgrade(object));
    }

    /// Whether a prior load attempt failed
    pub fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Acquire)
    }

    /// Mark the record as failed-to-load
    ///
    /// Sticky: later lookups through any reference sharing this record skip
    /// the database.
    pub fn mark_load_failed(&self) {
        self.load_failed.store(true, Ordering::Release);
    }

    /// Clear a recorded load failure (after a successful forced reload)
    pub fn clear_load_failed(&self) {
        self.load_failed.store(false, Ordering::Release);
    }
}

struct SharedRef {
    data: Arc<RefData>,
    store: Arc<ObjectStore>,
}

impl Clone for SharedRef {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            store: Arc::clone(&self.store),
        }
    }
}

impl Drop for SharedRef {
    fn drop(&mut self) {
        self.store.release_ref_data(&self.data);
    }
}

enum RefInner<T> {
    Null,
    Direct(Arc<T>),
    Shared(SharedRef),
}

/// A typed, lazily resolved reference to a persisted object
pub struct ObjectRef<T: PersistedType> {
    inner: RefInner<T>,
}

impl<T: PersistedType> ObjectRef<T> {
    /// A null reference
    pub fn null() -> Self {
        Self {
            inner: RefInner::Null,
        }
    }

    /// A reference resolved directly to a live instance
    pub fn direct(object: Arc<T>) -> Self {
        Self {
            inner: RefInner::Direct(object),
        }
    }

    /// A lazy reference by UID
    ///
    /// A nil UID yields a null reference.
    pub fn with_uuid(store: &Arc<ObjectStore>, uuid: Uuid) -> Self {
        if uuid.is_nil() {
            return Self::null();
        }
        Self {
            inner: RefInner::Shared(SharedRef {
                data: store.ref_data(uuid),
                store: Arc::clone(store),
            }),
        }
    }

    /// The referenced UID (nil for null references)
    pub fn uuid(&self) -> Uuid {
        match &self.inner {
            RefInner::Null => Uuid::nil(),
            RefInner::Direct(obj) => obj.state().uuid(),
            RefInner::Shared(shared) => shared.data.uuid(),
        }
    }

    /// Whether this is the null reference
    pub fn is_null(&self) -> bool {
        matches!(self.inner, RefInner::Null)
    }

    /// Replace the reference with a resolved instance
    pub fn set(&mut self, object: Arc<T>) {
        self.inner = RefInner::Direct(object);
    }

    /// Replace the reference by UID
    pub fn set_uuid(&mut self, store: &Arc<ObjectStore>, uuid: Uuid) {
        *self = Self::with_uuid(store, uuid);
    }

    /// Resolve without touching the database
    ///
    /// Returns the instance when it is held directly, recorded on the shared
    /// record, or live in the store's cache.
    pub fn get(&self) -> Option<Arc<T>> {
        match &self.inner {
            RefInner::Null => None,
            RefInner::Direct(obj) => Some(Arc::clone(obj)),
            RefInner::Shared(shared) => {
                if let Some(obj) = shared.data.current() {
                    return obj.as_any_arc().downcast::<T>().ok();
                }
                let cached = shared.store.get_cached(shared.data.uuid())?;
                shared.data.set_current(&cached);
                cached.as_any_arc().downcast::<T>().ok()
            }
        }
    }

    /// Resolve, loading from the database when not already live
    ///
    /// After a load that finds no row the failure sticks and the reference
    /// resolves to None without further database traffic. A database error
    /// also sticks, and is returned once.
    pub async fn load(&self, db: &dyn Database) -> Result<Option<Arc<T>>> {
        if let Some(obj) = self.get() {
            return Ok(Some(obj));
        }
        let shared = match &self.inner {
            RefInner::Shared(shared) => shared,
            _ => return Ok(None),
        };
        if shared.data.load_failed() {
            return Ok(None);
        }
        Self::load_shared(shared, db, false).await
    }

    /// Resolve with a forced database read
    ///
    /// Bypasses the cache, refreshes a live instance from the committed row
    /// and ignores (and clears, on success) a stuck load failure.
    pub async fn reload(&self, db: &dyn Database) -> Result<Option<Arc<T>>> {
        match &self.inner {
            RefInner::Null => Ok(None),
            RefInner::Direct(obj) => Ok(Some(Arc::clone(obj))),
            RefInner::Shared(shared) => Self::load_shared(shared, db, true).await,
        }
    }

    async fn load_shared(
        shared: &SharedRef,
        db: &dyn Database,
        reload: bool,
    ) -> Result<Option<Arc<T>>> {
        match db.load_object(T::METADATA, shared.data.uuid(), reload).await {
            Ok(Some(obj)) => {
                shared.data.set_current(&obj);
                if reload {
                    shared.data.clear_load_failed();
                }
                Ok(obj.as_any_arc().downcast::<T>().ok())
            }
            Ok(None) => {
                shared.data.mark_load_failed();
                Ok(None)
            }
            Err(e) => {
                shared.data.mark_load_failed();
                Err(e)
            }
        }
    }
}

impl<T: PersistedType> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: match &self.inner {
                RefInner::Null => RefInner::Null,
                RefInner::Direct(obj) => RefInner::Direct(Arc::clone(obj)),
                RefInner::Shared(shared) => RefInner::Shared(shared.clone()),
            },
        }
    }
}

impl<T: PersistedType> Default for ObjectRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: PersistedType> std::fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            RefInner::Null => write!(f, "ObjectRef(null)"),
            RefInner::Direct(obj) => write!(f, "ObjectRef(direct {})", obj.state().uuid()),
            RefInner::Shared(shared) => write!(f, "ObjectRef(lazy {})", shared.data.uuid()),
        }
    }
}
