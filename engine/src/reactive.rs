//! Reactive subscriptions over live queries.
//!
//! The reactor keeps a list of live `(query, args)` pairs and a list of
//! listeners. Every change event drained from the store's channel triggers a
//! global recompute: each live pair is re-run, its result (or error) cached
//! under the query and its serialized arguments, and then every listener is
//! invoked exactly once.
//!
//! Draining is synchronous and non-reentrant. A mutation issued from inside a
//! listener only enqueues its event; the outer drain loop picks it up once
//! the current cascade has finished.

use crate::{
    error::Result,
    query::Query,
    store::{ChangeEvent, DocumentStore},
    CollectionName, Document, Error,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Read-only view of the store handed to live query functions.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'s> {
    store: &'s DocumentStore,
}

impl<'s> Reader<'s> {
    pub fn new(store: &'s DocumentStore) -> Self {
        Self { store }
    }

    /// Look up a document in any collection.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        self.store.get(id)
    }

    /// Start a query pipeline.
    pub fn query(&self, collection: impl Into<CollectionName>) -> Query<'s> {
        Query::new(self.store, collection)
    }
}

type QueryFn = dyn Fn(&Reader<'_>, &Value) -> Result<Value>;

/// A named query function that can be kept live.
///
/// Cached results are keyed by the function's identity, which clones share.
/// The name is only a label; two distinct queries may carry the same one.
#[derive(Clone)]
pub struct LiveQuery {
    id: u64,
    name: Rc<str>,
    func: Rc<QueryFn>,
}

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery").field("name", &self.name).finish()
    }
}

impl LiveQuery {
    /// Wrap a query over raw JSON arguments and results.
    pub fn new<F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(&Reader<'_>, &Value) -> Result<Value> + 'static,
    {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            func: Rc::new(func),
        }
    }

    /// Wrap a query with typed arguments and results.
    pub fn typed<A, T, F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        A: DeserializeOwned,
        T: Serialize,
        F: Fn(&Reader<'_>, A) -> Result<T> + 'static,
    {
        Self::new(name, move |reader, args| {
            let args: A = serde_json::from_value(args.clone())
                .map_err(|e| Error::InvalidQuery(format!("bad arguments: {e}")))?;
            let output = func(reader, args)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity shared by this query and its clones.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the query once against `reader`.
    pub fn run(&self, reader: &Reader<'_>, args: &Value) -> Result<Value> {
        (self.func)(reader, args)
    }
}

/// Canonical cache key for a set of arguments.
///
/// Object keys serialize in sorted order, so equal arguments always produce
/// equal keys.
pub fn serialize_args(args: &Value) -> Result<String> {
    Ok(serde_json::to_string(args)?)
}

struct LivePair {
    token: u64,
    query: LiveQuery,
    args: Value,
    key: String,
}

type Listener = Rc<dyn Fn()>;

/// Resets the draining flag even if a query function panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl<'a> DrainGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// The recompute engine behind a [`Database`](crate::Database).
pub struct Reactor {
    receiver: RefCell<mpsc::Receiver<ChangeEvent>>,
    pairs: RefCell<Vec<Rc<LivePair>>>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    /// query id -> serialized args -> last result
    results: RefCell<HashMap<u64, HashMap<String, Result<Value>>>>,
    next_token: Cell<u64>,
    draining: Cell<bool>,
    /// A recompute was requested without a change event (new subscription)
    requested: Cell<bool>,
    recomputes: Cell<u64>,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("live_pairs", &self.pairs.borrow().len())
            .field("listeners", &self.listeners.borrow().len())
            .field("recomputes", &self.recomputes.get())
            .finish()
    }
}

impl Reactor {
    pub fn new(receiver: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            receiver: RefCell::new(receiver),
            pairs: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            results: RefCell::new(HashMap::new()),
            next_token: Cell::new(1),
            draining: Cell::new(false),
            requested: Cell::new(false),
            recomputes: Cell::new(0),
        }
    }

    /// Number of completed recompute cascades.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.get()
    }

    /// Number of live pairs.
    pub fn live_count(&self) -> usize {
        self.pairs.borrow().len()
    }

    /// Register a live pair and its listener, returning the registration
    /// token. The pair is computed once up front; if that fails nothing is
    /// registered.
    pub fn subscribe(
        &self,
        store: &DocumentStore,
        query: &LiveQuery,
        args: Value,
        on_change: impl Fn() + 'static,
    ) -> Result<u64> {
        let key = serialize_args(&args)?;
        let first = query.run(&Reader::new(store), &args)?;
        self.cache(query.id(), &key, Ok(first));

        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.pairs.borrow_mut().push(Rc::new(LivePair {
            token,
            query: query.clone(),
            args,
            key,
        }));
        self.listeners
            .borrow_mut()
            .push((token, Rc::new(on_change)));
        debug!(query = query.name(), token, "Subscribed");

        self.requested.set(true);
        self.drain(store);
        Ok(token)
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, token: u64) -> bool {
        let removed = {
            let mut pairs = self.pairs.borrow_mut();
            pairs
                .iter()
                .position(|p| p.token == token)
                .map(|index| pairs.remove(index))
        };
        self.listeners.borrow_mut().retain(|(t, _)| *t != token);

        let Some(pair) = removed else {
            return false;
        };

        // Drop the cached result once no live pair shares its key.
        let still_live = self
            .pairs
            .borrow()
            .iter()
            .any(|p| p.query.id() == pair.query.id() && p.key == pair.key);
        if !still_live {
            let mut results = self.results.borrow_mut();
            if let Some(by_args) = results.get_mut(&pair.query.id()) {
                by_args.remove(&pair.key);
                if by_args.is_empty() {
                    results.remove(&pair.query.id());
                }
            }
        }
        debug!(query = pair.query.name(), token, "Unsubscribed");
        true
    }

    /// Drop every live pair, listener and cached result.
    pub fn clear(&self) -> usize {
        let released = self.pairs.borrow_mut().drain(..).count();
        self.listeners.borrow_mut().clear();
        self.results.borrow_mut().clear();
        released
    }

    /// The last cached result for `(query, serialized_args)`.
    ///
    /// `Ok(None)` means no recompute has produced a result yet; `Err` is the
    /// error raised by the most recent run of that pair.
    pub fn retrieve(&self, query: &LiveQuery, serialized_args: &str) -> Result<Option<Value>> {
        match self
            .results
            .borrow()
            .get(&query.id())
            .and_then(|by_args| by_args.get(serialized_args))
        {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value.clone())),
            Some(Err(err)) => Err(err.clone()),
        }
    }

    /// Run recompute cascades until the change channel is empty.
    ///
    /// Called after every mutation. A nested call while a drain is already
    /// running returns immediately.
    pub fn drain(&self, store: &DocumentStore) {
        let Some(_guard) = DrainGuard::enter(&self.draining) else {
            trace!("Drain already running, event deferred");
            return;
        };

        loop {
            let next = self.receiver.borrow_mut().try_recv();
            match next {
                Ok(event) => {
                    trace!(seq = event.seq, kind = ?event.kind, collection = %event.collection, "Change event");
                    self.requested.set(false);
                    self.recompute(store);
                }
                Err(_) if self.requested.replace(false) => self.recompute(store),
                Err(_) => break,
            }
        }
    }

    fn recompute(&self, store: &DocumentStore) {
        let pairs: Vec<Rc<LivePair>> = self.pairs.borrow().clone();
        let reader = Reader::new(store);

        for pair in &pairs {
            let result = pair.query.run(&reader, &pair.args);
            if let Err(err) = &result {
                warn!(query = pair.query.name(), args = %pair.key, error = %err, "Live query failed");
            }
            self.cache(pair.query.id(), &pair.key, result);
        }

        let count = self.recomputes.get() + 1;
        self.recomputes.set(count);
        trace!(recompute = count, pairs = pairs.len(), "Recomputed live queries");

        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    fn cache(&self, query: u64, key: &str, result: Result<Value>) {
        self.results
            .borrow_mut()
            .entry(query)
            .or_default()
            .insert(key.to_string(), result);
    }
}

/// Handle for a live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    reactor: Weak<Reactor>,
    token: u64,
    query: LiveQuery,
    key: String,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query.name())
            .field("args", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(reactor: &Rc<Reactor>, token: u64, query: LiveQuery, key: String) -> Self {
        Self {
            reactor: Rc::downgrade(reactor),
            token,
            query,
            key,
        }
    }

    /// The serialized arguments this subscription is keyed by.
    pub fn serialized_args(&self) -> &str {
        &self.key
    }

    /// The latest cached result for this subscription's pair.
    pub fn current(&self) -> Result<Option<Value>> {
        match self.reactor.upgrade() {
            Some(reactor) => reactor.retrieve(&self.query, &self.key),
            None => Ok(None),
        }
    }

    /// Explicitly unsubscribe.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.unsubscribe(self.token);
        }
    }
}
