//! Record Module
//!
//! The generic record abstraction that revisions and scheduled mutations
//! operate on. This module provides:
//! - Record values (typed key/value state with an opaque id)
//! - The record store port (what storage backends must offer)
//! - A query surface (equality filters, ordering, pagination)
//! - In-memory and PostgreSQL store adapters

pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
pub use query::{Direction, Query};
pub use store::{RecordStore, SharedRecordStore};

use crate::error::{validation_error, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Nested key/value state of a record. Values are the usual JSON union
/// (null, bool, number, string, list, nested mapping).
pub type Mapping = serde_json::Map<String, Value>;

/// Identifier of a single record instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Interpret a stored JSON value as an id.
    ///
    /// Integers and non-empty strings are ids; everything else (null, empty
    /// string, floats, containers) is not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.is_empty() => Some(RecordId::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Str(s) => Value::from(s.as_str()),
        }
    }

    /// Storage key: the textual form, shared by integer and string ids
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Str(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Str(id)
    }
}

impl From<uuid::Uuid> for RecordId {
    fn from(id: uuid::Uuid) -> Self {
        RecordId::Str(id.to_string())
    }
}

/// A typed record: its type identifier, optional id and full state.
///
/// `id` is `None` when the record has not been persisted, or when a load
/// could not resolve the requested row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_type: String,
    pub id: Option<RecordId>,
    pub data: Mapping,
}

impl Record {
    pub fn new(record_type: impl Into<String>, id: impl Into<RecordId>, data: Mapping) -> Self {
        Self {
            record_type: record_type.into(),
            id: Some(id.into()),
            data,
        }
    }

    /// A record of the given type with no resolved id and no data
    pub fn unresolved(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: None,
            data: Mapping::new(),
        }
    }

    /// Both type and id, or a validation error naming what is missing
    pub fn identity(&self) -> AppResult<(&str, &RecordId)> {
        if self.record_type.trim().is_empty() {
            return Err(validation_error("Record type is not defined"));
        }
        let id = self.id.as_ref().ok_or_else(|| {
            validation_error(format!("Record \"{}\" has no id", self.record_type))
        })?;
        Ok((&self.record_type, id))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Overwrite each key of `changes` onto this record's state
    pub fn set_data(&mut self, changes: &Mapping) {
        for (key, value) in changes {
            self.data.insert(key.clone(), value.clone());
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

/// Decode stored structured data into a mapping.
///
/// Objects are taken as-is and strings are parsed as JSON text. Null,
/// unparsable text and non-object JSON all decode to an empty mapping.
pub fn decode_mapping(value: &Value) -> Mapping {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Mapping::new(),
        },
        _ => Mapping::new(),
    }
}

/// Build a mapping from a `json!` object literal; non-objects give an empty mapping
pub fn mapping(value: Value) -> Mapping {
    match value {
        Value::Object(map) => map,
        _ => Mapping::new(),
    }
}
