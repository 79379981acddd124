//! Documents stored in collections.

use crate::{error::Result, DocumentId, Error, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialized name of the identifier system field.
pub const ID_FIELD: &str = "_id";
/// Serialized name of the creation-time system field.
pub const CREATION_TIME_FIELD: &str = "_creationTime";
/// Name of the synced flag on sync-tracked collections.
pub const SYNCED_FIELD: &str = "synced";

/// A single record: two store-assigned system fields plus open user fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, assigned at insert time
    #[serde(rename = "_id")]
    pub id: DocumentId,
    /// Creation time in milliseconds since epoch, assigned at insert time
    #[serde(rename = "_creationTime")]
    pub creation_time: Timestamp,
    /// User fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a document from its parts.
    pub fn new(
        id: impl Into<DocumentId>,
        creation_time: Timestamp,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            creation_time,
            fields,
        }
    }

    /// Get a user field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Value of the synced flag; documents without one count as unsynced.
    pub fn is_synced(&self) -> bool {
        self.fields
            .get(SYNCED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Shallow-merge `partial` into the user fields.
    pub fn apply_patch(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            self.fields.insert(key, value);
        }
    }

    /// The document as a JSON object including system fields.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 2);
        object.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        object.insert(CREATION_TIME_FIELD.to_string(), Value::from(self.creation_time));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

/// Whether a field name is reserved for the store.
pub fn is_system_field(name: &str) -> bool {
    name.starts_with('_')
}

/// Require a JSON object and return its map.
pub(crate) fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(Error::InvalidDocument("a value is required".into())),
        other => Err(Error::InvalidDocument(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Reject an identifier that can never name a document.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
