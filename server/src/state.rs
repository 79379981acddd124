//! Shared server state: one authoritative table per hosted entity.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tidepool_engine::{AddOutcome, AuthoritativeTable, NumberEntry, SyncEntity, Todo, WireDocument};

use crate::config::Config;
use crate::error::{AppError, Result};

/// An authoritative table shared across handlers.
///
/// Every write that inserts or merges a row bumps a version counter that
/// watchers subscribe to.
#[derive(Debug)]
pub struct SharedTable<E> {
    table: RwLock<AuthoritativeTable<E>>,
    version: watch::Sender<u64>,
}

impl<E: SyncEntity + Send + Sync> SharedTable<E> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            table: RwLock::new(AuthoritativeTable::new()),
            version,
        }
    }

    /// The newest `count` rows, oldest first.
    pub async fn list(&self, count: usize) -> Vec<WireDocument<E>> {
        self.table.read().await.list(count)
    }

    /// Insert or merge a batch.
    pub async fn add(&self, documents: Vec<WireDocument<E>>) -> Result<AddOutcome> {
        let outcome = self.table.write().await.add(documents)?;
        if outcome.inserted + outcome.merged > 0 {
            self.version.send_modify(|v| *v += 1);
        }
        tracing::debug!(
            table = E::COLLECTION,
            inserted = outcome.inserted,
            merged = outcome.merged,
            unchanged = outcome.unchanged,
            "Table add"
        );
        Ok(outcome)
    }

    /// Notified after every changing write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }
}

impl<E: SyncEntity + Send + Sync> Default for SharedTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The tables this server hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Todos,
    Numbers,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Todos => Todo::COLLECTION,
            Table::Numbers => NumberEntry::COLLECTION,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            _ if s == Todo::COLLECTION => Ok(Table::Todos),
            _ if s == NumberEntry::COLLECTION => Ok(Table::Numbers),
            other => Err(AppError::NotFound(format!("Unknown table: {other}"))),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub todos: Arc<SharedTable<Todo>>,
    pub numbers: Arc<SharedTable<NumberEntry>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            todos: Arc::new(SharedTable::new()),
            numbers: Arc::new(SharedTable::new()),
            config: Arc::new(config),
        }
    }

    /// Change notifications for one table.
    pub fn subscribe(&self, table: Table) -> watch::Receiver<u64> {
        match table {
            Table::Todos => self.todos.subscribe(),
            Table::Numbers => self.numbers.subscribe(),
        }
    }
}
