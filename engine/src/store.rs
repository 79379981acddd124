//! Document store - the in-memory state container.
//!
//! The store owns every collection as an ordered list of documents in
//! insertion order. Collections are copy-on-write: a mutation builds the next
//! version of the affected collection, persists it through the backend, and
//! only then swaps it in. Readers holding an older snapshot are unaffected.
//!
//! Every committed mutation emits a [`ChangeEvent`] on the change channel.
//! The store never recomputes anything itself; the
//! [`Database`](crate::Database) drains the channel after each call, so the
//! mutators are crate-private and outside callers only get read access.

use crate::{
    clock::Clock,
    document::{self, Document, CREATION_TIME_FIELD, ID_FIELD, SYNCED_FIELD},
    error::Result,
    persistence::PersistenceBackend,
    snapshot::CollectionSnapshot,
    CollectionName, DocumentId, Error, Schema, Timestamp,
};
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Prefix of store-assigned document identifiers.
pub const CLIENT_ID_PREFIX: &str = "client:";

/// The kind of mutation that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Patch,
    Replace,
    Delete,
}

/// A committed mutation, published on the change channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Monotonic sequence number assigned by the store
    pub seq: u64,
    pub kind: ChangeKind,
    pub collection: CollectionName,
    pub id: DocumentId,
}

type Collections = BTreeMap<CollectionName, Rc<Vec<Document>>>;

/// The document store.
pub struct DocumentStore {
    schema: Schema,
    clock: Box<dyn Clock>,
    backend: Option<Box<dyn PersistenceBackend>>,
    collections: RefCell<Collections>,
    /// Global id index; identifiers are unique across collections
    locations: RefCell<HashMap<DocumentId, CollectionName>>,
    changes: mpsc::Sender<ChangeEvent>,
    next_seq: Cell<u64>,
    coalesced: Cell<u64>,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("schema_version", &self.schema.version)
            .field("collections", &self.collection_names())
            .field("persistent", &self.backend.is_some())
            .field("next_seq", &self.next_seq.get())
            .finish()
    }
}

impl DocumentStore {
    /// Create a store, loading any collections the backend already holds.
    pub(crate) fn open(
        schema: Schema,
        clock: Box<dyn Clock>,
        backend: Option<Box<dyn PersistenceBackend>>,
        changes: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self> {
        let store = Self {
            schema,
            clock,
            backend,
            collections: RefCell::new(BTreeMap::new()),
            locations: RefCell::new(HashMap::new()),
            changes,
            next_seq: Cell::new(1),
            coalesced: Cell::new(0),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let mut collections = Collections::new();
        let mut locations = HashMap::new();

        for key in backend.keys()? {
            let Some(bytes) = backend.read(&key)? else {
                continue;
            };
            let snapshot = CollectionSnapshot::from_bytes(&bytes)?;
            snapshot.validate(self.schema.version)?;
            if snapshot.collection != key {
                return Err(Error::InvalidSnapshot(format!(
                    "snapshot stored under '{}' names collection '{}'",
                    key, snapshot.collection
                )));
            }
            for doc in &snapshot.documents {
                if locations
                    .insert(doc.id.clone(), snapshot.collection.clone())
                    .is_some()
                {
                    return Err(Error::InvalidSnapshot(format!(
                        "document id '{}' appears in more than one collection",
                        doc.id
                    )));
                }
            }
            debug!(
                collection = %snapshot.collection,
                documents = snapshot.len(),
                "Loaded collection"
            );
            collections.insert(snapshot.collection, Rc::new(snapshot.documents));
        }

        *self.collections.borrow_mut() = collections;
        *self.locations.borrow_mut() = locations;
        Ok(())
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get the clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Names of all non-empty or previously written collections.
    pub fn collection_names(&self) -> Vec<CollectionName> {
        self.collections.borrow().keys().cloned().collect()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .borrow()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Whether the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Events dropped because the change channel was full.
    pub fn coalesced_events(&self) -> u64 {
        self.coalesced.get()
    }

    /// A snapshot of a collection in storage order.
    pub fn scan(&self, collection: &str) -> Rc<Vec<Document>> {
        self.collections
            .borrow()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Export a collection in its persisted form.
    pub fn export(&self, collection: &str) -> CollectionSnapshot {
        CollectionSnapshot::new(
            self.schema.version,
            collection,
            self.scan(collection).as_ref().clone(),
        )
    }

    /// Which collection holds the document, if any.
    pub fn locate(&self, id: &str) -> Option<CollectionName> {
        self.locations.borrow().get(id).cloned()
    }

    /// Look up a document in any collection.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        document::validate_id(id)?;
        let Some(collection) = self.locate(id) else {
            return Ok(None);
        };
        Ok(self
            .collections
            .borrow()
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }

    /// Insert a new document and return its generated identifier.
    pub(crate) fn insert(&self, collection: &str, value: Value) -> Result<DocumentId> {
        validate_collection_name(collection)?;
        let mut fields = document::into_object(value)?;
        reject_system_fields(&fields)?;
        if self.schema.is_sync_tracked(collection) && !fields.contains_key(SYNCED_FIELD) {
            fields.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
        }
        self.schema.validate(collection, &fields)?;

        let id = self.generate_id();
        let creation_time = self.clock.now();
        let doc = Document::new(id.clone(), creation_time, fields);
        self.append(collection, doc, ChangeKind::Insert)?;
        Ok(id)
    }

    /// Insert a document that already carries an identity, such as one
    /// received from the remote store.
    pub(crate) fn insert_with_identity(
        &self,
        collection: &str,
        id: &str,
        creation_time: Timestamp,
        value: Value,
    ) -> Result<()> {
        validate_collection_name(collection)?;
        document::validate_id(id)?;
        if self.locations.borrow().contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let fields = document::into_object(value)?;
        reject_system_fields(&fields)?;
        self.schema.validate(collection, &fields)?;

        let doc = Document::new(id, creation_time, fields);
        self.append(collection, doc, ChangeKind::Insert)
    }

    /// Shallow-merge `partial` into an existing document.
    ///
    /// Returns the updated document, or `None` when no document has `id`.
    pub(crate) fn patch(&self, id: &str, partial: Value) -> Result<Option<Document>> {
        document::validate_id(id)?;
        let partial = document::into_object(partial)?;
        self.update(id, ChangeKind::Patch, |existing, sync_tracked| {
            let mut partial = strip_matching_system_fields(existing, partial)?;
            if sync_tracked && !partial.contains_key(SYNCED_FIELD) {
                partial.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
            }
            let mut next = existing.clone();
            next.apply_patch(partial);
            Ok(next)
        })
    }

    /// Replace all user fields of an existing document.
    ///
    /// Returns the updated document, or `None` when no document has `id`.
    pub(crate) fn replace(&self, id: &str, value: Value) -> Result<Option<Document>> {
        document::validate_id(id)?;
        let value = document::into_object(value)?;
        self.update(id, ChangeKind::Replace, |existing, sync_tracked| {
            let mut fields = strip_matching_system_fields(existing, value)?;
            if sync_tracked && !fields.contains_key(SYNCED_FIELD) {
                fields.insert(SYNCED_FIELD.to_string(), Value::Bool(false));
            }
            Ok(Document::new(existing.id.clone(), existing.creation_time, fields))
        })
    }

    /// Physically remove a document.
    ///
    /// Returns the removed document, or `None` when no document has `id`.
    pub(crate) fn delete(&self, id: &str) -> Result<Option<Document>> {
        document::validate_id(id)?;
        let Some(collection) = self.locate(id) else {
            return Ok(None);
        };

        let current = self.scan(&collection);
        let Some(position) = current.iter().position(|d| d.id == id) else {
            return Ok(None);
        };

        let mut next = current.as_ref().clone();
        let removed = next.remove(position);
        self.commit(&collection, next)?;
        self.locations.borrow_mut().remove(id);

        trace!(%collection, id, "Deleted document");
        self.emit(ChangeKind::Delete, &collection, id);
        Ok(Some(removed))
    }

    fn append(&self, collection: &str, doc: Document, kind: ChangeKind) -> Result<()> {
        let mut next = self.scan(collection).as_ref().clone();
        let id = doc.id.clone();
        next.push(doc);
        self.commit(collection, next)?;
        self.locations
            .borrow_mut()
            .insert(id.clone(), collection.to_string());

        trace!(collection, id = %id, "Inserted document");
        self.emit(kind, collection, &id);
        Ok(())
    }

    fn update<F>(&self, id: &str, kind: ChangeKind, build: F) -> Result<Option<Document>>
    where
        F: FnOnce(&Document, bool) -> Result<Document>,
    {
        let Some(collection) = self.locate(id) else {
            return Ok(None);
        };

        let current = self.scan(&collection);
        let Some(position) = current.iter().position(|d| d.id == id) else {
            return Ok(None);
        };

        let sync_tracked = self.schema.is_sync_tracked(&collection);
        let updated = build(&current[position], sync_tracked)?;
        self.schema.validate(&collection, &updated.fields)?;

        let mut next = current.as_ref().clone();
        next[position] = updated.clone();
        self.commit(&collection, next)?;

        trace!(%collection, id, ?kind, "Updated document");
        self.emit(kind, &collection, id);
        Ok(Some(updated))
    }

    /// Persist the next version of a collection, then make it current.
    fn commit(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        if let Some(backend) = &self.backend {
            let snapshot = CollectionSnapshot::new(self.schema.version, collection, docs);
            let bytes = snapshot.to_bytes()?;
            if let Err(err) = backend.write(collection, &bytes) {
                warn!(collection, error = %err, "Failed to persist collection");
                return Err(err);
            }
            self.collections
                .borrow_mut()
                .insert(collection.to_string(), Rc::new(snapshot.documents));
        } else {
            self.collections
                .borrow_mut()
                .insert(collection.to_string(), Rc::new(docs));
        }
        Ok(())
    }

    fn emit(&self, kind: ChangeKind, collection: &str, id: &str) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let event = ChangeEvent {
            seq,
            kind,
            collection: collection.to_string(),
            id: id.to_string(),
        };
        match self.changes.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                // A pending event already guarantees a later recompute.
                self.coalesced.set(self.coalesced.get() + 1);
                trace!(seq = event.seq, "Change channel full, coalesced event");
            }
            Err(TrySendError::Closed(event)) => {
                trace!(seq = event.seq, "Change channel closed, event dropped");
            }
        }
    }

    fn generate_id(&self) -> DocumentId {
        let locations = self.locations.borrow();
        loop {
            let id = format!("{}{}", CLIENT_ID_PREFIX, uuid::Uuid::new_v4());
            if !locations.contains_key(&id) {
                return id;
            }
        }
    }
}

fn validate_collection_name(collection: &str) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(Error::InvalidDocument(
            "collection name must not be empty".into(),
        ));
    }
    Ok(())
}

fn reject_system_fields(fields: &Map<String, Value>) -> Result<()> {
    match fields.keys().find(|k| document::is_system_field(k)) {
        Some(field) => Err(Error::SystemField(field.clone())),
        None => Ok(()),
    }
}

/// Drop `_id`/`_creationTime` entries that restate the existing values;
/// anything else starting with `_` is rejected.
fn strip_matching_system_fields(
    existing: &Document,
    mut fields: Map<String, Value>,
) -> Result<Map<String, Value>> {
    if let Some(value) = fields.remove(ID_FIELD) {
        if value.as_str() != Some(existing.id.as_str()) {
            return Err(Error::SystemField(ID_FIELD.to_string()));
        }
    }
    if let Some(value) = fields.remove(CREATION_TIME_FIELD) {
        if value.as_u64() != Some(existing.creation_time) {
            return Err(Error::SystemField(CREATION_TIME_FIELD.to_string()));
        }
    }
    reject_system_fields(&fields)?;
    Ok(fields)
}
