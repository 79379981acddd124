//! Snapshot types for persisting and restoring collections.
//!
//! A [`CollectionSnapshot`] is the unit written to a
//! [`PersistenceBackend`](crate::PersistenceBackend): one snapshot per
//! collection, keyed by collection name. Documents keep their storage order.

use crate::{error::Result, CollectionName, Document, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Collection name
    pub collection: CollectionName,
    /// Documents in storage order
    pub documents: Vec<Document>,
}

impl CollectionSnapshot {
    /// Create a snapshot of the given documents.
    pub fn new(
        schema_version: SchemaVersion,
        collection: impl Into<CollectionName>,
        documents: Vec<Document>,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            collection: collection.into(),
            documents,
        }
    }

    /// Number of documents in the snapshot.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the snapshot holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Check structural invariants: matching schema version and unique ids.
    pub fn validate(&self, schema_version: SchemaVersion) -> Result<()> {
        if self.schema_version != schema_version {
            return Err(Error::InvalidSnapshot(format!(
                "schema version mismatch for '{}': expected {}, got {}",
                self.collection, schema_version, self.schema_version
            )));
        }

        let mut seen = HashSet::with_capacity(self.documents.len());
        for doc in &self.documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate document id '{}' in '{}'",
                    doc.id, self.collection
                )));
            }
        }

        Ok(())
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
