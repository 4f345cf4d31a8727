//! Hand-written persistable types shared by the integration tests
//!
//! An object generator produces these in a real deployment; the tests write
//! them out by hand so the trait contract stays visible.

use gamedb::prelude::*;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

const CHARACTER_FIELDS: &[FieldDef] = &[
    FieldDef::unique_lookup("Name", ColumnType::Text),
    FieldDef::new("Level", ColumnType::Int),
    FieldDef::new("Stamina", ColumnType::Int),
];

pub const CHARACTER_METADATA: ObjectMetadata = ObjectMetadata {
    name: "Character",
    fields: CHARACTER_FIELDS,
};

#[derive(Default)]
pub struct Character {
    state: ObjectState,
    name: Mutex<String>,
    level: Mutex<i32>,
    stamina: Mutex<i32>,
}

impl Character {
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

impl Persistent for Character {
    fn metadata(&self) -> &'static ObjectMetadata {
        &CHARACTER_METADATA
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn member_bind_values(&self, retrieve_all: bool) -> Vec<BindValue> {
        let mut values = Vec::new();
        if retrieve_all || self.state.is_dirty("Name") {
            values.push(BindValue::new("Name", self.name()));
        }
        if retrieve_all || self.state.is_dirty("Level") {
            values.push(BindValue::new("Level", self.level()));
        }
        if retrieve_all || self.state.is_dirty("Stamina") {
            values.push(BindValue::new("Stamina", self.stamina()));
        }
        values
    }

    fn load_database_values(&self, row: &DatabaseRow) -> Result<()> {
        if let Some(v) = row.get("Name").and_then(Value::as_str) {
            *self.name.lock() = v.to_string();
        }
        if let Some(v) = row.get("Level").and_then(Value::as_int) {
            *self.level.lock() = v;
        }
        if let Some(v) = row.get("Stamina").and_then(Value::as_int) {
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

impl PersistedType for Character {
    const METADATA: &'static ObjectMetadata = &CHARACTER_METADATA;

    fn construct() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

const ITEM_FIELDS: &[FieldDef] = &[
    FieldDef::lookup("Owner", ColumnType::Uuid),
    FieldDef::new("Name", ColumnType::Text),
    FieldDef::new("Quantity", ColumnType::Int),
];

pub const ITEM_METADATA: ObjectMetadata = ObjectMetadata {
    name: "Item",
    fields: ITEM_FIELDS,
};

#[derive(Default)]
pub struct Item {
    state: ObjectState,
    owner: Mutex<Uuid>,
    name: Mutex<String>,
    quantity: Mutex<i32>,
}

impl Item {
    pub fn owner(&self) -> Uuid {
        *self.owner.lock()
    }

    pub fn set_owner(&self, value: Uuid) {
        *self.owner.lock() = value;
        self.state.flag_dirty("Owner");
    }

    pub fn owner_ref(&self, store: &Arc<ObjectStore>) -> ObjectRef<Character> {
        ObjectRef::with_uuid(store, self.owner())
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, value: impl Into<String>) {
        *self.name.lock() = value.into();
        self.state.flag_dirty("Name");
    }

    pub fn quantity(&self) -> i32 {
        *self.quantity.lock()
    }

    pub fn set_quantity(&self, value: i32) {
        *self.quantity.lock() = value;
        self.state.flag_dirty("Quantity");
    }
}

impl Persistent for Item {
    fn metadata(&self) -> &'static ObjectMetadata {
        &ITEM_METADATA
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn member_bind_values(&self, retrieve_all: bool) -> Vec<BindValue> {
        let mut values = Vec::new();
        if retrieve_all || self.state.is_dirty("Owner") {
            values.push(BindValue::new("Owner", self.owner()));
        }
        if retrieve_all || self.state.is_dirty("Name") {
            values.push(BindValue::new("Name", self.name()));
        }
        if retrieve_all || self.state.is_dirty("Quantity") {
            values.push(BindValue::new("Quantity", self.quantity()));
        }
        values
    }

    fn load_database_values(&self, row: &DatabaseRow) -> Result<()> {
        if let Some(v) = row.get("Owner").and_then(Value::as_uuid) {
            *self.owner.lock() = v;
        }
        if let Some(v) = row.get("Name").and_then(Value::as_str) {
            *self.name.lock() = v.to_string();
        }
        if let Some(v) = row.get("Quantity").and_then(Value::as_int) {
            if v < 0 {
                return Err(DatabaseError::query("Item row holds a negative Quantity"));
            }
            *self.quantity.lock() = v;
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

impl PersistedType for Item {
    const METADATA: &'static ObjectMetadata = &ITEM_METADATA;

    fn construct() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

const PROFILE_FIELDS: &[FieldDef] = &[
    FieldDef::new("Alias", ColumnType::Text),
    FieldDef::new("Portrait", ColumnType::Blob),
    FieldDef::new("Luck", ColumnType::Float),
    FieldDef::new("Winrate", ColumnType::Double),
    FieldDef::new("Premium", ColumnType::Bool),
    FieldDef::new("Playtime", ColumnType::BigInt),
    FieldDef::new("Rank", ColumnType::Int),
    FieldDef::lookup("Clan", ColumnType::Uuid),
];

pub const PROFILE_METADATA: ObjectMetadata = ObjectMetadata {
    name: "Profile",
    fields: PROFILE_FIELDS,
};

/// An account profile with one member of every storable column type
#[derive(Default)]
pub struct Profile {
    state: ObjectState,
    alias: Mutex<String>,
    portrait: Mutex<Vec<u8>>,
    luck: Mutex<f32>,
    winrate: Mutex<f64>,
    premium: Mutex<bool>,
    playtime: Mutex<i64>,
    rank: Mutex<i32>,
    clan: Mutex<Uuid>,
}

impl Profile {
    pub fn alias(&self) -> String {
        self.alias.lock().clone()
    }

    pub fn set_alias(&self, value: impl Into<String>) {
        *self.alias.lock() = value.into();
        self.state.flag_dirty("Alias");
    }

    pub fn portrait(&self) -> Vec<u8> {
        self.portrait.lock().clone()
    }

    pub fn set_portrait(&self, value: Vec<u8>) {
        *self.portrait.lock() = value;
        self.state.flag_dirty("Portrait");
    }

    pub fn luck(&self) -> f32 {
        *self.luck.lock()
    }

    pub fn set_luck(&self, value: f32) {
        *self.luck.lock() = value;
        self.state.flag_dirty("Luck");
    }

    pub fn winrate(&self) -> f64 {
        *self.winrate.lock()
    }

    pub fn set_winrate(&self, value: f64) {
        *self.winrate.lock() = value;
        self.state.flag_dirty("Winrate");
    }

    pub fn premium(&self) -> bool {
        *self.premium.lock()
    }

    pub fn set_premium(&self, value: bool) {
        *self.premium.lock() = value;
        self.state.flag_dirty("Premium");
    }

    pub fn playtime(&self) -> i64 {
        *self.playtime.lock()
    }

    pub fn set_playtime(&self, value: i64) {
        *self.playtime.lock() = value;
        self.state.flag_dirty("Playtime");
    }

    pub fn rank(&self) -> i32 {
        *self.rank.lock()
    }

    pub fn set_rank(&self, value: i32) {
        *self.rank.lock() = value;
        self.state.flag_dirty("Rank");
    }

    pub fn clan(&self) -> Uuid {
        *self.clan.lock()
    }

    pub fn set_clan(&self, value: Uuid) {
        *self.clan.lock() = value;
        self.state.flag_dirty("Clan");
    }
}

impl Persistent for Profile {
    fn metadata(&self) -> &'static ObjectMetadata {
        &PROFILE_METADATA
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn member_bind_values(&self, retrieve_all: bool) -> Vec<BindValue> {
        let mut values = Vec::new();
        if retrieve_all || self.state.is_dirty("Alias") {
            values.push(BindValue::new("Alias", self.alias()));
        }
        if retrieve_all || self.state.is_dirty("Portrait") {
            values.push(BindValue::new("Portrait", self.portrait()));
        }
        if retrieve_all || self.state.is_dirty("Luck") {
            values.push(BindValue::new("Luck", self.luck()));
        }
        if retrieve_all || self.state.is_dirty("Winrate") {
            values.push(BindValue::new("Winrate", self.winrate()));
        }
        if retrieve_all || self.state.is_dirty("Premium") {
            values.push(BindValue::new("Premium", self.premium()));
        }
        if retrieve_all || self.state.is_dirty("Playtime") {
            values.push(BindValue::new("Playtime", self.playtime()));
        }
        if retrieve_all || self.state.is_dirty("Rank") {
            values.push(BindValue::new("Rank", self.rank()));
        }
        if retrieve_all || self.state.is_dirty("Clan") {
            values.push(BindValue::new("Clan", self.clan()));
        }
        values
    }

    fn load_database_values(&self, row: &DatabaseRow) -> Result<()> {
        if let Some(v) = row.get("Alias").and_then(Value::as_str) {
            *self.alias.lock() = v.to_string();
        }
        if let Some(v) = row.get("Portrait").and_then(Value::as_bytes) {
            *self.portrait.lock() = v.to_vec();
        }
        if let Some(v) = row.get("Luck").and_then(Value::as_float) {
            *self.luck.lock() = v;
        }
        if let Some(v) = row.get("Winrate").and_then(Value::as_double) {
            *self.winrate.lock() = v;
        }
        if let Some(v) = row.get("Premium").and_then(Value::as_bool) {
            *self.premium.lock() = v;
        }
        if let Some(v) = row.get("Playtime").and_then(Value::as_long) {
            *self.playtime.lock() = v;
        }
        if let Some(v) = row.get("Rank").and_then(Value::as_int) {
            *self.rank.lock() = v;
        }
        if let Some(v) = row.get("Clan").and_then(Value::as_uuid) {
            *self.clan.lock() = v;
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

impl PersistedType for Profile {
    const METADATA: &'static ObjectMetadata = &PROFILE_METADATA;

    fn construct() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// A connected, set-up in-memory database with the test types registered
pub async fn open_test_db() -> (SqliteDatabase, Arc<ObjectStore>) {
    let store = Arc::new(ObjectStore::new());
    store.register_type::<Character>();
    store.register_type::<Item>();
    store.register_type::<Profile>();
    let db = SqliteDatabase::new(SqliteConfig::in_memory(), Arc::clone(&store));
    db.connect().await.expect("connect");
    db.setup().await.expect("setup");
    (db, store)
}
