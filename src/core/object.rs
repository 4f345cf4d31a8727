//! Persistable object model
//!
//! Objects that survive in a database implement [`Persistent`]. Each
//! instance carries an [`ObjectState`]: its UID, a permanent deletion mark,
//! and the set of members changed since the last successful save. Generated
//! setters flag members dirty; the save path reads and clears the set, so an
//! unchanged object produces no write traffic.

use crate::core::error::Result;
use crate::core::schema::ObjectMetadata;
use crate::core::value::{BindValue, DatabaseRow};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Per-instance persistence state
///
/// Shared by every persistable type; holds everything the persistence layer
/// tracks that is not a member column.
#[derive(Debug, Default)]
pub struct ObjectState {
    uuid: RwLock<Uuid>,
    deleted: AtomicBool,
    dirty: Mutex<HashSet<String>>,
}

impl ObjectState {
    /// New state with a nil UID and no changes
    pub fn new() -> Self {
        Self::default()
    }

    /// New state with a known UID
    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: RwLock::new(uuid),
            ..Self::default()
        }
    }

    /// The object's UID (nil until registered)
    pub fn uuid(&self) -> Uuid {
        *self.uuid.read()
    }

    /// Assign the object's UID
    pub fn set_uuid(&self, uuid: Uuid) {
        *self.uuid.write() = uuid;
    }

    /// Whether the object has been unregistered
    ///
    /// Once set this never clears; a deleted instance cannot re-enter the
    /// registry.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Permanently mark the object deleted
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Flag a member as changed since the last save
    pub fn flag_dirty(&self, member: &str) {
        self.dirty.lock().insert(member.to_string());
    }

    /// Whether any member changed since the last save
    pub fn has_changes(&self) -> bool {
        !self.dirty.lock().is_empty()
    }

    /// Whether a specific member changed since the last save
    pub fn is_dirty(&self, member: &str) -> bool {
        self.dirty.lock().contains(member)
    }

    /// Snapshot the changed member set
    pub fn dirty_members(&self) -> HashSet<String> {
        self.dirty.lock().clone()
    }

    /// Clear specific members from the changed set
    ///
    /// Called only after the save that carried them succeeded; a failed save
    /// leaves the set intact so the members are retried.
    pub fn clear_dirty(&self, members: &HashSet<String>) {
        let mut dirty = self.dirty.lock();
        for m in members {
            dirty.remove(m);
        }
    }

    /// Clear the whole changed set (after a full reload)
    pub fn clear_all_dirty(&self) {
        self.dirty.lock().clear();
    }
}

/// A database-persistable object
///
/// Implementations use interior mutability for their members so instances
/// can be shared as `Arc<dyn Persistent>` across the registry, references,
/// and change sets.
pub trait Persistent: Send + Sync {
    /// Static metadata for this type (table name, columns, lookup keys)
    fn metadata(&self) -> &'static ObjectMetadata;

    /// The instance's persistence state
    fn state(&self) -> &ObjectState;

    /// Member bind values for a save
    ///
    /// With `retrieve_all` set, every member is returned (inserts and forced
    /// reloads); otherwise only members currently flagged dirty.
    fn member_bind_values(&self, retrieve_all: bool) -> Vec<BindValue>;

    /// Overwrite members from a database row
    ///
    /// Used when loading and when reloading after an explicit update. Does
    /// not touch the UID or the changed set.
    fn load_database_values(&self, row: &DatabaseRow) -> Result<()>;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Downcasting support for shared instances
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Persistent {
    /// The object's UID
    pub fn uuid(&self) -> Uuid {
        self.state().uuid()
    }

    /// The object's table name
    pub fn table_name(&self) -> &'static str {
        self.metadata().name
    }
}

/// A persistable type known to the registry
///
/// The non-object-safe half of [`Persistent`]: static metadata plus a
/// constructor the loader uses to materialize rows.
pub trait PersistedType: Persistent + Sized + 'static {
    /// Static metadata for this type
    const METADATA: &'static ObjectMetadata;

    /// Construct a blank instance with a nil UID
    fn construct() -> Arc<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_defaults() {
        let state = ObjectState::new();
        assert!(state.uuid().is_nil());
        assert!(!state.is_deleted());
        assert!(!state.has_changes());
    }

    #[test]
    fn test_dirty_tracking() {
        let state = ObjectState::new();
        state.flag_dirty("Stamina");
        state.flag_dirty("Owner");
        assert!(state.has_changes());
        assert!(state.is_dirty("Stamina"));

        let saved = state.dirty_members();
        state.flag_dirty("Level");
        state.clear_dirty(&saved);
        assert!(state.is_dirty("Level"));
        assert!(!state.is_dirty("Stamina"));
    }

    #[test]
    fn test_deletion_is_permanent() {
        let state = ObjectState::new();
        state.mark_deleted();
        assert!(state.is_deleted());
    }
}
