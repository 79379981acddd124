//! Schema definition and validation.
//!
//! Collections may register a schema; registered collections are validated
//! at the store boundary on every insert, patch and replace. Collections
//! without a schema are stored as-is.

use crate::{document::SYNCED_FIELD, error::Result, CollectionName, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The shape a field's value must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Integral number, signed or unsigned
    Int,
    /// Any number
    Float,
    Bool,
    /// Milliseconds since the epoch, never negative
    Timestamp,
    /// Anything, nested or not
    Json,
}

impl FieldType {
    /// Display name, also used in type mismatch errors.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        }
    }

    /// Whether a non-null `value` has this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Json, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Int, Value::Number(n)) => !n.is_f64(),
            (FieldType::Timestamp, Value::Number(n)) => n.is_u64(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the JSON kind of `value`, for error messages.
fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Int",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Required fields reject both absence and `null`
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// An optional field; absent and `null` both pass.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Check a field's value, `None` meaning the field is absent.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        let value = match value {
            Some(Value::Null) | None if self.required => {
                return Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(Value::Null) | None => return Ok(()),
            Some(value) => value,
        };
        if self.field_type.accepts(value) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type.to_string(),
            got: value_kind(value).to_string(),
        })
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Whether documents carry a `synced` flag managed by the store
    #[serde(default)]
    pub sync_tracked: bool,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            sync_tracked: false,
        }
    }

    /// Mark the collection as sync tracked and declare its `synced` field.
    pub fn sync_tracked(mut self) -> Self {
        self.sync_tracked = true;
        if !self.fields.iter().any(|f| f.name == SYNCED_FIELD) {
            self.fields
                .push(FieldDef::required(SYNCED_FIELD, FieldType::Bool));
        }
        self
    }

    /// Validate a document's user fields against this schema.
    pub fn validate_fields(&self, fields: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            field.validate(fields.get(&field.name))?;
        }
        Ok(())
    }

    /// Validate an arbitrary JSON payload against this schema.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("payload must be an object".into()))?;
        self.validate_fields(obj)
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version, recorded in persisted snapshots
    pub version: SchemaVersion,
    /// Collection schemas by name
    pub collections: HashMap<CollectionName, CollectionSchema>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: HashMap::new(),
        }
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Whether the collection maintains a `synced` flag.
    pub fn is_sync_tracked(&self, collection: &str) -> bool {
        self.collections
            .get(collection)
            .map(|c| c.sync_tracked)
            .unwrap_or(false)
    }

    /// Validate a document's fields; schemaless collections always pass.
    pub fn validate(&self, collection: &str, fields: &Map<String, Value>) -> Result<()> {
        match self.collections.get(collection) {
            Some(schema) => schema.validate_fields(fields),
            None => Ok(()),
        }
    }
}
