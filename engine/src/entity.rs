//! Typed entities that synchronize with a remote store.
//!
//! A [`SyncEntity`] names its collection, declares its schema and supplies
//! its merge function. Documents move between two projections:
//!
//! - [`LocalDocument`]: the store's view, with store-assigned identity and the
//!   `synced` flag.
//! - [`WireDocument`]: the remote's view, identity renamed to
//!   `clientId`/`clientCreationTime` and no `synced` flag.

use crate::{
    document::{Document, SYNCED_FIELD},
    error::Result,
    schema::CollectionSchema,
    DocumentId, Error, Timestamp,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Wire name of the identity field.
pub const CLIENT_ID_FIELD: &str = "clientId";

/// An entity type stored in one sync-tracked collection.
pub trait SyncEntity:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + 'static
{
    /// Name of the backing collection, locally and remotely.
    const COLLECTION: &'static str;

    /// Resolve two versions of the same document.
    ///
    /// Must be pure and deterministic, and re-applying the same `incoming`
    /// to the result must not change it.
    fn merge(existing: &Self, incoming: &Self) -> Self;

    /// Schema of the backing collection. Implementations mark it sync tracked.
    fn schema() -> CollectionSchema;
}

/// An entity as exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDocument<E> {
    pub client_id: DocumentId,
    pub client_creation_time: Timestamp,
    #[serde(flatten)]
    pub entity: E,
}

impl<E: SyncEntity> WireDocument<E> {
    pub fn new(client_id: impl Into<DocumentId>, client_creation_time: Timestamp, entity: E) -> Self {
        Self {
            client_id: client_id.into(),
            client_creation_time,
            entity,
        }
    }

    /// Project a stored document onto the wire shape.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let local = LocalDocument::<E>::from_document(doc)?;
        Ok(local.into_wire())
    }

    /// Reject documents that cannot be matched to a local or remote row.
    pub fn validate_identity(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::MissingIdentity(CLIENT_ID_FIELD));
        }
        Ok(())
    }
}

/// An entity as held in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument<E> {
    pub id: DocumentId,
    pub creation_time: Timestamp,
    pub synced: bool,
    pub entity: E,
}

impl<E: SyncEntity> LocalDocument<E> {
    /// Decode a stored document of `E::COLLECTION`.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut fields = doc.fields.clone();
        let synced = fields
            .remove(SYNCED_FIELD)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let entity = serde_json::from_value(Value::Object(fields)).map_err(|e| {
            Error::MalformedDocument {
                collection: E::COLLECTION.to_string(),
                id: doc.id.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            id: doc.id.clone(),
            creation_time: doc.creation_time,
            synced,
            entity,
        })
    }

    /// Drop the synced flag and rename identity for the remote store.
    pub fn into_wire(self) -> WireDocument<E> {
        WireDocument {
            client_id: self.id,
            client_creation_time: self.creation_time,
            entity: self.entity,
        }
    }
}

/// Serialize an entity into the user fields of a document.
pub fn entity_fields<E: Serialize>(entity: &E) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!(
            "entity must serialize to an object, got {other}"
        ))),
    }
}

/// Entity fields plus an explicit synced flag, ready for the store.
pub(crate) fn stored_value<E: Serialize>(entity: &E, synced: bool) -> Result<Value> {
    let mut fields = entity_fields(entity)?;
    fields.insert(SYNCED_FIELD.to_string(), Value::Bool(synced));
    Ok(Value::Object(fields))
}
