//! Core types for record stores.

use crate::error::{Result, StoreError};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Attribute name that mirrors a record's identity.
pub const ID_ATTRIBUTE: &str = "id";

/// Unique identifier for a record.
///
/// Opaque text. Numeric ids found in stored records are kept in their
/// decimal string form so that index entries compare equal to them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of an attribute value.
    ///
    /// Strings and numbers qualify; anything else (including the empty
    /// string) is treated as "no id".
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(RecordId(s.clone())),
            Value::Number(n) => Some(RecordId(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// A single record: a JSON object plus its identity.
///
/// Identity lives in two places, the top-level `id` and the `"id"`
/// attribute. The store keeps them in step when it assigns an id; once
/// assigned, an id never changes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    /// Identity, if one has been assigned.
    pub id: Option<RecordId>,

    /// Application-defined attributes.
    pub attributes: Map<String, Value>,
}

impl Record {
    /// Build a record from attributes, taking its id from the `"id"` attribute.
    pub fn new(attributes: Map<String, Value>) -> Self {
        let id = attributes.get(ID_ATTRIBUTE).and_then(RecordId::from_value);
        Self { id, attributes }
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(attributes) => Ok(Self::new(attributes)),
            other => Err(StoreError::Deserialization(format!(
                "record must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// A record carrying only an id, as used to look one up.
    pub fn with_id(id: impl Into<RecordId>) -> Self {
        let mut record = Self::default();
        record.assign_id(id.into());
        record
    }

    /// Set the identity on both the top-level id and the attribute set.
    pub fn assign_id(&mut self, id: RecordId) {
        self.attributes
            .insert(ID_ATTRIBUTE.to_string(), Value::String(id.0.clone()));
        self.id = Some(id);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Serialize to the textual form kept in a namespace.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the textual form kept in a namespace.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let missing_id = match &self.id {
            Some(id) if !self.attributes.contains_key(ID_ATTRIBUTE) => Some(id),
            _ => None,
        };

        let len = self.attributes.len() + usize::from(missing_id.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(id) = missing_id {
            map.serialize_entry(ID_ATTRIBUTE, id.as_str())?;
        }
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let attributes = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Record::new(attributes))
    }
}

/// What a model layer wants done with a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    Read,
    Create,
    Update,
    Delete,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Read => "read",
            Intent::Create => "create",
            Intent::Update => "update",
            Intent::Delete => "delete",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Intent::Read),
            "create" => Ok(Intent::Create),
            "update" => Ok(Intent::Update),
            "delete" => Ok(Intent::Delete),
            other => Err(StoreError::InvalidIntent(other.to_string())),
        }
    }
}
