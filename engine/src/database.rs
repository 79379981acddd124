//! The database handle.
//!
//! [`Database`] composes the [`DocumentStore`] and the [`Reactor`] and is the
//! context every caller passes around explicitly. Each mutation goes to the
//! store and then drains the change channel, so by the time a mutating call
//! returns every live query has been recomputed and every listener notified.
//!
//! The handle is a cheap `Rc` clone and is intentionally `!Send`: the engine
//! is single-threaded and cooperative.

use crate::{
    clock::{Clock, SystemClock},
    error::Result,
    persistence::PersistenceBackend,
    query::Query,
    reactive::{serialize_args, LiveQuery, Reactor, Reader, Subscription},
    schema::{CollectionSchema, Schema},
    snapshot::CollectionSnapshot,
    store::DocumentStore,
    CollectionName, Document, DocumentId, SyncEntity, Timestamp,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::debug;

/// Default capacity of the change channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// Configures and opens a [`Database`].
pub struct DatabaseBuilder {
    schema: Schema,
    clock: Box<dyn Clock>,
    backend: Option<Box<dyn PersistenceBackend>>,
    change_capacity: usize,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self {
            schema: Schema::default(),
            clock: Box::new(SystemClock),
            backend: None,
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

impl fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("schema", &self.schema)
            .field("clock", &self.clock)
            .field("backend", &self.backend)
            .field("change_capacity", &self.change_capacity)
            .finish()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole schema.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Register one collection schema.
    pub fn collection(mut self, collection: CollectionSchema) -> Self {
        self.schema.add_collection(collection);
        self
    }

    /// Register the collection backing a synchronizable entity.
    pub fn with_entity<E: SyncEntity>(self) -> Self {
        self.collection(E::schema())
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn backend(mut self, backend: impl PersistenceBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Capacity of the change channel; clamped to at least one.
    pub fn change_capacity(mut self, capacity: usize) -> Self {
        self.change_capacity = capacity.max(1);
        self
    }

    /// Open the database, loading persisted collections if a backend is set.
    pub fn open(self) -> Result<Database> {
        let (sender, receiver) = mpsc::channel(self.change_capacity);
        let persistent = self.backend.is_some();
        let store = DocumentStore::open(self.schema, self.clock, self.backend, sender)?;
        debug!(
            collections = store.collection_names().len(),
            persistent,
            capacity = self.change_capacity,
            "Database opened"
        );
        Ok(Database {
            inner: Rc::new(DatabaseInner {
                store,
                reactor: Rc::new(Reactor::new(receiver)),
            }),
        })
    }
}

struct DatabaseInner {
    store: DocumentStore,
    reactor: Rc<Reactor>,
}

/// A local document database with live queries.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.inner.store)
            .field("reactor", &self.inner.reactor)
            .finish()
    }
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open an in-memory database with the given schema and the system clock.
    pub fn open(schema: Schema) -> Result<Self> {
        DatabaseBuilder::new().schema(schema).open()
    }

    /// Release every subscription and cached result.
    ///
    /// Listeners often capture a clone of the handle; closing breaks those
    /// cycles. Documents stay readable through remaining clones.
    pub fn close(self) {
        let released = self.inner.reactor.clear();
        debug!(released, "Database closed");
    }

    /// Read access to the underlying store. Writes go through the
    /// mutating methods on this handle.
    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    /// A read-only view for running queries.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.inner.store)
    }

    /// Current time from the configured clock.
    pub fn now(&self) -> Timestamp {
        self.inner.store.clock().now()
    }

    /// Look up a document in any collection.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        self.inner.store.get(id)
    }

    /// Start a query pipeline over `collection`.
    pub fn query(&self, collection: impl Into<CollectionName>) -> Query<'_> {
        Query::new(&self.inner.store, collection)
    }

    /// Insert a document and return its generated id.
    pub fn insert(&self, collection: &str, value: Value) -> Result<DocumentId> {
        let id = self.inner.store.insert(collection, value)?;
        self.settle();
        Ok(id)
    }

    /// Insert a document under an identity assigned elsewhere.
    pub fn insert_with_identity(
        &self,
        collection: &str,
        id: &str,
        creation_time: Timestamp,
        value: Value,
    ) -> Result<()> {
        self.inner
            .store
            .insert_with_identity(collection, id, creation_time, value)?;
        self.settle();
        Ok(())
    }

    /// Shallow-merge fields into a document. `Ok(None)` if it does not exist.
    pub fn patch(&self, id: &str, partial: Value) -> Result<Option<Document>> {
        let updated = self.inner.store.patch(id, partial)?;
        if updated.is_some() {
            self.settle();
        }
        Ok(updated)
    }

    /// Replace a document's user fields. `Ok(None)` if it does not exist.
    pub fn replace(&self, id: &str, value: Value) -> Result<Option<Document>> {
        let updated = self.inner.store.replace(id, value)?;
        if updated.is_some() {
            self.settle();
        }
        Ok(updated)
    }

    /// Remove a document. `Ok(None)` if it does not exist.
    pub fn delete(&self, id: &str) -> Result<Option<Document>> {
        let removed = self.inner.store.delete(id)?;
        if removed.is_some() {
            self.settle();
        }
        Ok(removed)
    }

    /// Keep `(query, args)` live and call `on_change` after every recompute.
    pub fn subscribe(
        &self,
        query: &LiveQuery,
        args: Value,
        on_change: impl Fn() + 'static,
    ) -> Result<Subscription> {
        let key = serialize_args(&args)?;
        let token = self
            .inner
            .reactor
            .subscribe(&self.inner.store, query, args, on_change)?;
        Ok(Subscription::new(
            &self.inner.reactor,
            token,
            query.clone(),
            key,
        ))
    }

    /// The last cached result for a live pair.
    pub fn retrieve(&self, query: &LiveQuery, serialized_args: &str) -> Result<Option<Value>> {
        self.inner.reactor.retrieve(query, serialized_args)
    }

    /// Like [`retrieve`](Self::retrieve), deserialized into `T`.
    pub fn retrieve_as<T: DeserializeOwned>(
        &self,
        query: &LiveQuery,
        serialized_args: &str,
    ) -> Result<Option<T>> {
        match self.retrieve(query, serialized_args)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// How many recompute cascades have run.
    pub fn recompute_count(&self) -> u64 {
        self.inner.reactor.recompute_count()
    }

    /// Number of live `(query, args)` pairs.
    pub fn live_queries(&self) -> usize {
        self.inner.reactor.live_count()
    }

    /// Export a collection in its persisted form.
    pub fn export(&self, collection: &str) -> CollectionSnapshot {
        self.inner.store.export(collection)
    }

    fn settle(&self) {
        self.inner.reactor.drain(&self.inner.store);
    }
}
