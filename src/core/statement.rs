//! Portable prepared statements and result sets
//!
//! A [`Statement`] is an owned, backend-neutral prepared statement: the SQL
//! text plus a bind slot table built by scanning the text for `:name` and
//! `:N` placeholders at prepare time. Drivers translate the slots to their
//! native positional form when executing. A [`RowSet`] carries fully
//! materialized results with a cursor, so no driver handle outlives the call
//! that produced it.

use crate::core::error::{DatabaseError, Result};
use crate::core::value::{DatabaseRow, Value};

/// A backend-neutral prepared statement with named or positional bindings
#[derive(Debug, Clone)]
pub struct Statement {
    text: String,
    slots: Vec<String>,
    bindings: Vec<Option<Value>>,
}

impl Statement {
    /// Prepare a statement from SQL text
    ///
    /// Placeholders of the form `:name` or `:0`, `:1`, ... are collected in
    /// order of first appearance. Placeholders inside single-quoted string
    /// literals are ignored.
    pub fn prepare(text: impl Into<String>) -> Self {
        let text = text.into();
        let slots = scan_placeholders(&text);
        let bindings = vec![None; slots.len()];
        Self {
            text,
            slots,
            bindings,
        }
    }

    /// Get the statement text as written
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of bind slots found in the statement text
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Bind a value by placeholder name
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let idx = self
            .slots
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| DatabaseError::prepare(format!("unknown placeholder ':{name}'")))?;
        self.bindings[idx] = Some(value.into());
        Ok(self)
    }

    /// Bind a value by slot index (0-based, matching `:0` style placeholders)
    pub fn bind_index(&mut self, index: usize, value: impl Into<Value>) -> Result<&mut Self> {
        if index >= self.bindings.len() {
            return Err(DatabaseError::prepare(format!(
                "bind index {index} out of range for {} slots",
                self.bindings.len()
            )));
        }
        self.bindings[index] = Some(value.into());
        Ok(self)
    }

    /// All bound values in slot order
    ///
    /// Fails if any slot is still unbound, so drivers never see a partial
    /// parameter list.
    pub fn bound_values(&self) -> Result<Vec<Value>> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(i, b)| {
                b.clone().ok_or_else(|| {
                    DatabaseError::prepare(format!("placeholder ':{}' was never bound", self.slots[i]))
                })
            })
            .collect()
    }

    /// The statement text with every placeholder rewritten by the callback
    ///
    /// Drivers use this to translate to their native positional syntax
    /// (`?` for SQLite and MySQL). The callback receives the 0-based slot
    /// index of each placeholder occurrence.
    pub fn text_with_placeholders(&self, mut rewrite: impl FnMut(usize) -> String) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.char_indices().peekable();
        let mut in_string = false;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                in_string = !in_string;
                out.push(c);
                continue;
            }
            if !in_string && c == ':' {
                let start = i + 1;
                let mut end = start;
                for (j, cj) in self.text[start..].char_indices() {
                    if cj.is_alphanumeric() || cj == '_' {
                        end = start + j + cj.len_utf8();
                    } else {
                        break;
                    }
                }
                if end > start {
                    let name = &self.text[start..end];
                    if let Some(idx) = self.slots.iter().position(|s| s == name) {
                        out.push_str(&rewrite(idx));
                        while let Some(&(j, _)) = chars.peek() {
                            if j < end {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        continue;
                    }
                }
            }
            out.push(c);
        }
        out
    }
}

fn scan_placeholders(text: &str) -> Vec<String> {
    let mut slots: Vec<String> = Vec::new();
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if !in_string && c == ':' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() {
                let cj = bytes[end] as char;
                if cj.is_ascii_alphanumeric() || cj == '_' {
                    end += 1;
                } else {
                    break;
                }
            }
            if end > start {
                let name = &text[start..end];
                if !slots.iter().any(|s| s == name) {
                    slots.push(name.to_string());
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    slots
}

/// Materialized query results with a forward cursor
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    rows: Vec<DatabaseRow>,
    cursor: usize,
    affected: u64,
}

impl RowSet {
    /// Build a result set from materialized rows
    pub fn new(rows: Vec<DatabaseRow>) -> Self {
        Self {
            rows,
            cursor: 0,
            affected: 0,
        }
    }

    /// Build an empty result set carrying only an affected-row count
    pub fn affected(count: u64) -> Self {
        Self {
            rows: Vec::new(),
            cursor: 0,
            affected: count,
        }
    }

    /// Rows affected by the statement (for INSERT/UPDATE/DELETE)
    pub fn affected_rows(&self) -> u64 {
        self.affected
    }

    /// Number of result rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result set holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Advance the cursor; returns the next row or None at the end
    pub fn next(&mut self) -> Option<&DatabaseRow> {
        let row = self.rows.get(self.cursor)?;
        self.cursor += 1;
        Some(row)
    }

    /// The row the cursor last advanced past
    pub fn current(&self) -> Option<&DatabaseRow> {
        if self.cursor == 0 {
            None
        } else {
            self.rows.get(self.cursor - 1)
        }
    }

    /// All rows, ignoring the cursor
    pub fn rows(&self) -> &[DatabaseRow] {
        &self.rows
    }

    /// Consume the result set, yielding its rows
    pub fn into_rows(self) -> Vec<DatabaseRow> {
        self.rows
    }

    /// Read a typed column from the current row
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        let row = self
            .current()
            .ok_or_else(|| DatabaseError::query("cursor is not positioned on a row"))?;
        let value = row
            .get(column)
            .ok_or_else(|| DatabaseError::ColumnNotFound(column.to_string()))?;
        T::from_value(value).ok_or_else(|| DatabaseError::TypeMismatch {
            expected: T::TYPE_NAME.to_string(),
            actual: value.type_name().to_string(),
        })
    }
}

/// Typed extraction from a column [`Value`]
pub trait FromValue: Sized {
    /// Name used in type mismatch errors
    const TYPE_NAME: &'static str;

    /// Extract a value of this type, or None on mismatch
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i32 {
    const TYPE_NAME: &'static str = "int";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "bigint";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_long()
    }
}

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "float";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "double";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_double()
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "text";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for uuid::Uuid {
    const TYPE_NAME: &'static str = "uuid";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_uuid()
    }
}

impl FromValue for Vec<u8> {
    const TYPE_NAME: &'static str = "blob";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}
