//! Persisted type metadata
//!
//! Every persistable object type carries a static [`ObjectMetadata`]
//! describing its table: the type name, the member columns with their
//! declared column types, and which members are lookup keys. Backends use
//! this both to generate statements and to verify the live schema during
//! setup.

use crate::core::value::Value;

/// Column type of a persisted member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Blob,
    Uuid,
    Int,
    BigInt,
    Float,
    Double,
    Bool,
}

impl ColumnType {
    /// Column type a given value would be stored as
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Blob(_) => Some(ColumnType::Blob),
            Value::Uuid(_) => Some(ColumnType::Uuid),
            Value::Int(_) => Some(ColumnType::Int),
            Value::BigInt(_) => Some(ColumnType::BigInt),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Bool(_) => Some(ColumnType::Bool),
        }
    }
}

/// A persisted member column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name (matches the member name)
    pub name: &'static str,
    /// Declared column type
    pub column_type: ColumnType,
    /// Whether loads by this member are expected; indexed during setup
    pub lookup_key: bool,
    /// Whether the lookup index enforces uniqueness
    pub unique: bool,
}

impl FieldDef {
    /// A plain, non-indexed member
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            lookup_key: false,
            unique: false,
        }
    }

    /// A lookup key member (indexed during setup)
    pub const fn lookup(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            lookup_key: true,
            unique: false,
        }
    }

    /// A unique lookup key member
    pub const fn unique_lookup(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            lookup_key: true,
            unique: true,
        }
    }
}

/// Static description of a persisted object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Type name; doubles as the table name
    pub name: &'static str,
    /// Member columns in declaration order (UID excluded)
    pub fields: &'static [FieldDef],
}

impl ObjectMetadata {
    /// Look up a member column by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Members flagged as lookup keys
    pub fn lookup_keys(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.lookup_key)
    }
}

/// Compare a declared column type against a type string reported by the
/// backend's catalog
///
/// Size qualifiers such as `varchar(36)` vs `varchar` do not count as a
/// mismatch, and the comparison is case-insensitive. Each backend maps its
/// own catalog spellings onto the declared type via `accepted`.
pub fn type_matches(reported: &str, accepted: &[&str]) -> bool {
    let base = reported
        .split('(')
        .next()
        .unwrap_or(reported)
        .trim()
        .to_lowercase();
    accepted.iter().any(|a| a.eq_ignore_ascii_case(&base))
}
