//! The remote store boundary.
//!
//! [`RemoteStore`] is the only place the engine suspends. The
//! [`AuthoritativeTable`] holds the remote-side insert-or-merge logic so the
//! in-process remote used in tests and the reference server behave the same.

use crate::{entity::WireDocument, error::Result, DocumentId, Error, SyncEntity};
use async_trait::async_trait;
use futures::stream::{self, LocalBoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::watch;
use tracing::debug;

/// A full list result from the remote store.
pub type RemoteSnapshot<E> = Vec<WireDocument<E>>;

/// Counts from one `add` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOutcome {
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
}

impl AddOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.merged + self.unchanged
    }
}

/// The remote authoritative store for one entity type.
#[async_trait(?Send)]
pub trait RemoteStore<E: SyncEntity> {
    /// The newest `count` documents in ascending order.
    async fn list(&self, count: usize) -> Result<RemoteSnapshot<E>>;

    /// Insert or merge a batch of documents.
    async fn add(&self, documents: Vec<WireDocument<E>>) -> Result<AddOutcome>;

    /// The current `list(count)` result, then a new one after every change.
    fn watch(&self, count: usize) -> LocalBoxStream<'static, RemoteSnapshot<E>>;
}

/// An ordered table with a uniqueness index on `clientId`.
#[derive(Debug, Clone)]
pub struct AuthoritativeTable<E> {
    rows: Vec<WireDocument<E>>,
    by_client_id: HashMap<DocumentId, usize>,
}

impl<E> Default for AuthoritativeTable<E> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            by_client_id: HashMap::new(),
        }
    }
}

impl<E: SyncEntity> AuthoritativeTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, client_id: &str) -> Option<&WireDocument<E>> {
        self.by_client_id.get(client_id).map(|&i| &self.rows[i])
    }

    /// Insert unseen documents and merge known ones.
    ///
    /// The whole batch is validated before anything is written.
    pub fn add(&mut self, documents: Vec<WireDocument<E>>) -> Result<AddOutcome> {
        for doc in &documents {
            doc.validate_identity()?;
        }

        let mut outcome = AddOutcome::default();
        for incoming in documents {
            match self.by_client_id.get(&incoming.client_id).copied() {
                None => {
                    self.by_client_id
                        .insert(incoming.client_id.clone(), self.rows.len());
                    self.rows.push(incoming);
                    outcome.inserted += 1;
                }
                Some(index) => {
                    let existing = &mut self.rows[index];
                    let merged = E::merge(&existing.entity, &incoming.entity);
                    if merged == existing.entity {
                        outcome.unchanged += 1;
                    } else {
                        existing.entity = merged;
                        outcome.merged += 1;
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// The newest `count` rows, oldest first.
    pub fn list(&self, count: usize) -> RemoteSnapshot<E> {
        let start = self.rows.len().saturating_sub(count);
        self.rows[start..].to_vec()
    }
}

/// An in-process remote store, shared by clones.
pub struct InMemoryRemote<E> {
    table: Rc<RefCell<AuthoritativeTable<E>>>,
    version: Rc<watch::Sender<u64>>,
    fail_next: Rc<Cell<Option<&'static str>>>,
    add_calls: Rc<Cell<usize>>,
}

impl<E> Clone for InMemoryRemote<E> {
    fn clone(&self) -> Self {
        Self {
            table: Rc::clone(&self.table),
            version: Rc::clone(&self.version),
            fail_next: Rc::clone(&self.fail_next),
            add_calls: Rc::clone(&self.add_calls),
        }
    }
}

impl<E: SyncEntity> Default for InMemoryRemote<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SyncEntity> InMemoryRemote<E> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            table: Rc::new(RefCell::new(AuthoritativeTable::new())),
            version: Rc::new(version),
            fail_next: Rc::new(Cell::new(None)),
            add_calls: Rc::new(Cell::new(0)),
        }
    }

    /// Make the next `add` fail with a remote error.
    pub fn fail_next_add(&self, message: &'static str) {
        self.fail_next.set(Some(message));
    }

    /// Number of `add` requests received, failed ones included.
    pub fn add_calls(&self) -> usize {
        self.add_calls.get()
    }

    /// Current state of a row.
    pub fn row(&self, client_id: &str) -> Option<WireDocument<E>> {
        self.table.borrow().get(client_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }

    /// Drop this handle. Watch streams end once every clone is gone.
    pub fn shutdown(self) {
        drop(self);
    }
}

#[async_trait(?Send)]
impl<E: SyncEntity> RemoteStore<E> for InMemoryRemote<E> {
    async fn list(&self, count: usize) -> Result<RemoteSnapshot<E>> {
        Ok(self.table.borrow().list(count))
    }

    async fn add(&self, documents: Vec<WireDocument<E>>) -> Result<AddOutcome> {
        self.add_calls.set(self.add_calls.get() + 1);
        if let Some(message) = self.fail_next.take() {
            return Err(Error::Remote(message.to_string()));
        }

        let outcome = self.table.borrow_mut().add(documents)?;
        debug!(
            collection = E::COLLECTION,
            inserted = outcome.inserted,
            merged = outcome.merged,
            unchanged = outcome.unchanged,
            "Remote add"
        );
        if outcome.inserted + outcome.merged > 0 {
            self.version.send_modify(|v| *v += 1);
        }
        Ok(outcome)
    }

    fn watch(&self, count: usize) -> LocalBoxStream<'static, RemoteSnapshot<E>> {
        let receiver = self.version.subscribe();
        let table = Rc::clone(&self.table);
        stream::unfold(
            (receiver, table, true),
            move |(mut receiver, table, first)| async move {
                if !first && receiver.changed().await.is_err() {
                    return None;
                }
                let _seen = *receiver.borrow_and_update();
                let snapshot = table.borrow().list(count);
                Some((snapshot, (receiver, table, false)))
            },
        )
        .boxed_local()
    }
}
