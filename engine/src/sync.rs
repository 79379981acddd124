//! The sync engine.
//!
//! Outbound: collect unsynced documents of one entity collection, send them
//! to the remote in a single batch, and on success flag exactly those
//! documents whose current value still equals what was sent.
//!
//! Inbound: apply a remote snapshot document by document. Unknown documents
//! are inserted as synced; known ones are merged, and stay unsynced when the
//! merged value differs from the remote's so the next push carries the
//! locally dominant fields back.

use crate::{
    database::Database,
    entity::{stored_value, LocalDocument, WireDocument},
    error::Result,
    remote::{AddOutcome, RemoteSnapshot, RemoteStore},
    DocumentId, Error, SyncEntity,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Result of one outbound push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// Documents sent in the batch
    pub sent: usize,
    /// Documents flagged synced afterwards
    pub acknowledged: usize,
    /// What the remote did with the batch
    pub remote: AddOutcome,
}

/// Result of applying one inbound snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
}

/// Synchronizes one entity collection of a [`Database`] with a remote store.
pub struct SyncEngine<'a, E, R> {
    db: &'a Database,
    remote: R,
    _entity: PhantomData<E>,
}

impl<'a, E, R> SyncEngine<'a, E, R>
where
    E: SyncEntity,
    R: RemoteStore<E>,
{
    pub fn new(db: &'a Database, remote: R) -> Self {
        Self {
            db,
            remote,
            _entity: PhantomData,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Unsynced documents of the collection in wire shape.
    ///
    /// Fails if any unsynced document does not decode as `E`.
    pub fn unsynced(&self) -> Result<Vec<WireDocument<E>>> {
        self.db
            .query(E::COLLECTION)
            .filter(|doc| !doc.is_synced())?
            .collect()?
            .iter()
            .map(WireDocument::<E>::from_document)
            .collect()
    }

    /// Send every unsynced document in one batch.
    ///
    /// An empty batch sends nothing. If the remote rejects the batch no
    /// flag changes.
    pub async fn push(&self) -> Result<PushReport> {
        let batch = self.unsynced()?;
        if batch.is_empty() {
            return Ok(PushReport::default());
        }

        let sent = batch.len();
        let remote = match self.remote.add(batch.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(collection = E::COLLECTION, sent, error = %err, "Push failed");
                return Err(err);
            }
        };
        let acknowledged = self.acknowledge(&batch)?;
        debug!(
            collection = E::COLLECTION,
            sent, acknowledged, "Pushed batch"
        );
        Ok(PushReport {
            sent,
            acknowledged,
            remote,
        })
    }

    /// Flag documents synced whose current value equals the acknowledged
    /// payload. Documents edited since the batch was built stay unsynced.
    pub fn acknowledge(&self, batch: &[WireDocument<E>]) -> Result<usize> {
        let mut acknowledged = 0;
        for sent in batch {
            let Some(doc) = self.db.get(&sent.client_id)? else {
                continue;
            };
            let local = LocalDocument::<E>::from_document(&doc)?;
            if local.synced || local.entity != sent.entity {
                continue;
            }
            self.db
                .patch(&sent.client_id, serde_json::json!({ "synced": true }))?;
            acknowledged += 1;
        }
        Ok(acknowledged)
    }

    /// Merge a remote snapshot into the local collection.
    ///
    /// Every incoming document is checked, and every local counterpart
    /// decoded, before anything is written: a bad document fails the whole
    /// snapshot.
    pub fn apply_snapshot(&self, snapshot: RemoteSnapshot<E>) -> Result<ApplyReport> {
        let mut planned = Vec::with_capacity(snapshot.len());
        let mut seen = HashSet::with_capacity(snapshot.len());
        for incoming in snapshot {
            incoming.validate_identity()?;
            if !seen.insert(incoming.client_id.clone()) {
                return Err(Error::DuplicateId(incoming.client_id));
            }
            let local = match self.db.store().locate(&incoming.client_id) {
                None => None,
                Some(collection) if collection == E::COLLECTION => self
                    .db
                    .get(&incoming.client_id)?
                    .map(|doc| LocalDocument::<E>::from_document(&doc))
                    .transpose()?,
                Some(_) => return Err(Error::DuplicateId(incoming.client_id)),
            };
            planned.push((incoming, local));
        }

        let mut report = ApplyReport::default();
        for (incoming, local) in planned {
            let id = incoming.client_id.as_str();
            let Some(local) = local else {
                self.db.insert_with_identity(
                    E::COLLECTION,
                    id,
                    incoming.client_creation_time,
                    stored_value(&incoming.entity, true)?,
                )?;
                report.inserted += 1;
                continue;
            };

            let merged = E::merge(&local.entity, &incoming.entity);
            let synced = merged == incoming.entity;
            if merged == local.entity && synced == local.synced {
                report.unchanged += 1;
                continue;
            }

            self.db.patch(id, stored_value(&merged, synced)?)?;
            report.merged += 1;
        }

        debug!(
            collection = E::COLLECTION,
            inserted = report.inserted,
            merged = report.merged,
            unchanged = report.unchanged,
            "Applied remote snapshot"
        );
        Ok(report)
    }

    /// Fetch the newest `count` remote documents and apply them.
    pub async fn pull(&self, count: usize) -> Result<ApplyReport> {
        let snapshot = self.remote.list(count).await?;
        self.apply_snapshot(snapshot)
    }

    /// Apply every snapshot the remote publishes until its stream ends.
    ///
    /// Returns the number of snapshots applied. Stops at the first snapshot
    /// that fails to apply.
    pub async fn follow(&self, count: usize) -> Result<usize> {
        let mut snapshots = self.remote.watch(count);
        let mut applied = 0;
        while let Some(snapshot) = snapshots.next().await {
            self.apply_snapshot(snapshot)?;
            applied += 1;
        }
        debug!(collection = E::COLLECTION, applied, "Remote stream ended");
        Ok(applied)
    }
}

/// Decode every document of `E::COLLECTION` in storage order.
pub fn load_all<E: SyncEntity>(db: &Database) -> Result<Vec<LocalDocument<E>>> {
    db.query(E::COLLECTION)
        .collect()?
        .iter()
        .map(LocalDocument::<E>::from_document)
        .collect()
}

/// Insert a new local entity, unsynced.
pub fn insert_entity<E: SyncEntity>(db: &Database, entity: &E) -> Result<DocumentId> {
    db.insert(E::COLLECTION, stored_value(entity, false)?)
}

/// Overwrite a local entity's fields. The store resets its synced flag.
pub fn update_entity<E: SyncEntity>(db: &Database, id: &str, entity: &E) -> Result<bool> {
    let fields = Value::Object(crate::entity::entity_fields(entity)?);
    Ok(db.patch(id, fields)?.is_some())
}
