//! Concrete synchronizable entities.

use crate::{
    merge::{resolve_tombstone, resolve_versioned},
    schema::{CollectionSchema, FieldDef, FieldType},
    SyncEntity, Timestamp,
};
use serde::{Deserialize, Serialize};

/// A todo item.
///
/// `completed` is versioned by `completed_changed_time`. `deleted_time` is a
/// tombstone and `text` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub text: String,
    pub completed: bool,
    pub completed_changed_time: Timestamp,
    #[serde(default)]
    pub deleted_time: Option<Timestamp>,
}

impl Todo {
    pub fn new(text: impl Into<String>, now: Timestamp) -> Self {
        Self {
            text: text.into(),
            completed: false,
            completed_changed_time: now,
            deleted_time: None,
        }
    }

    /// Set the completed flag, stamping the change time.
    pub fn set_completed(&mut self, completed: bool, now: Timestamp) {
        self.completed = completed;
        self.completed_changed_time = now;
    }

    /// Mark as deleted.
    pub fn tombstone(&mut self, now: Timestamp) {
        self.deleted_time = Some(now);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_time.is_some()
    }
}

impl SyncEntity for Todo {
    const COLLECTION: &'static str = "todos";

    fn merge(existing: &Self, incoming: &Self) -> Self {
        let (completed, completed_changed_time) = resolve_versioned(
            (&existing.completed, existing.completed_changed_time),
            (&incoming.completed, incoming.completed_changed_time),
        );
        let deleted_time = resolve_tombstone(
            existing.deleted_time,
            incoming.deleted_time,
            completed_changed_time,
        );
        Self {
            text: existing.text.clone(),
            completed,
            completed_changed_time,
            deleted_time,
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![
                FieldDef::required("text", FieldType::String),
                FieldDef::required("completed", FieldType::Bool),
                FieldDef::required("completedChangedTime", FieldType::Timestamp),
                FieldDef::optional("deletedTime", FieldType::Timestamp),
            ],
        )
        .sync_tracked()
    }
}

/// An immutable number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberEntry {
    pub value: f64,
}

impl SyncEntity for NumberEntry {
    const COLLECTION: &'static str = "numbers";

    fn merge(existing: &Self, _incoming: &Self) -> Self {
        existing.clone()
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![FieldDef::required("value", FieldType::Float)],
        )
        .sync_tracked()
    }
}
