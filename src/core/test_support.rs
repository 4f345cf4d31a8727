//! Hand-written persistable fixture for unit tests

use crate::core::error::Result;
use crate::core::object::{ObjectState, PersistedType, Persistent};
use crate::core::schema::{ColumnType, FieldDef, ObjectMetadata};
use crate::core::value::{BindValue, DatabaseRow};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

const ACCOUNT_FIELDS: &[FieldDef] = &[
    FieldDef::unique_lookup("Name", ColumnType::Text),
    FieldDef::new("Level", ColumnType::Int),
    FieldDef::new("Stamina", ColumnType::Int),
];

pub const ACCOUNT_METADATA: ObjectMetadata = ObjectMetadata {
    name: "TestAccount",
    fields: ACCOUNT_FIELDS,
};

#[derive(Default)]
pub struct TestAccount {
    state: ObjectState,
    name: Mutex<String>,
    level: Mutex<i32>,
    stamina: Mutex<i32>,
}

impl TestAccount {
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, value: impl Into<String>) {
        *self.name.lock() = value.into();
        self.state.flag_dirty("Name");
    }

    pub fn level(&self) -> i32 {
        *self.level.lock()
    }

    pub fn set_level(&self, value: i32) {
        *self.level.lock() = value;
        self.state.flag_dirty("Level");
    }

    pub fn stamina(&self) -> i32 {
        *self.stamina.lock()
    }

    pub fn set_stamina(&self, value: i32) {
        *self.stamina.lock() = value;
        self.state.flag_dirty("Stamina");
    }
}

impl Persistent for TestAccount {
    fn metadata(&self) -> &'static ObjectMetadata {
        &ACCOUNT_METADATA
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn member_bind_values(&self, retrieve_all: bool) -> Vec<BindValue> {
        let mut values = Vec::new();
        for field in ACCOUNT_FIELDS {
            if !retrieve_all && !self.state.is_dirty(field.name) {
                continue;
            }
            let value = match field.name {
                "Name" => BindValue::new("Name", self.name()),
                "Level" => BindValue::new("Level", self.level()),
                "Stamina" => BindValue::new("Stamina", self.stamina()),
                _ => unreachable!(),
            };
            values.push(value);
        }
        values
    }

    fn load_database_values(&self, row: &DatabaseRow) -> Result<()> {
        if let Some(v) = row.get("Name").and_then(|v| v.as_str()) {
            *self.name.lock() = v.to_string();
        }
        if let Some(v) = row.get("Level").and_then(|v| v.as_int()) {
            *self.level.lock() = v;
        }
        if let Some(v) = row.get("Stamina").and_then(|v| v.as_int()) {
            *self.stamina.lock() = v;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl PersistedType for TestAccount {
    const METADATA: &'static ObjectMetadata = &ACCOUNT_METADATA;

    fn construct() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
