//! # Tidepool Engine
//!
//! A local-first embedded document store with live queries and
//! last-writer-wins synchronization.
//!
//! Applications read and write a local copy of their data, keep working while
//! offline, and later reconcile local edits with a remote authoritative store
//! without losing data or diverging.
//!
//! ## Design Principles
//!
//! - **Local first**: every read and write hits the local store; the remote
//!   is only touched by the sync engine
//! - **Single threaded**: a [`Database`] is an `Rc` handle with interior
//!   state; the only suspension points are at the [`RemoteStore`] boundary
//! - **Deterministic merge**: conflict resolution is a pure function per
//!   entity type, safe to re-run on every sync round
//!
//! ## Core Concepts
//!
//! ### Documents and collections
//!
//! A [`Document`] is an open JSON object plus two store-assigned system
//! fields, `_id` and `_creationTime`. Collections keep documents in insertion
//! order and may register a [`CollectionSchema`].
//!
//! ### Queries
//!
//! [`Query`] pipelines are single use: each stage can be chained or executed
//! once. Ordering reverses the scanned snapshot; limits and filters apply
//! afterwards in chain order.
//!
//! ### Live queries
//!
//! [`Database::subscribe`] keeps a [`LiveQuery`] and its arguments live.
//! Every mutation recomputes all live queries before returning and notifies
//! every listener once. Results are read back with [`Database::retrieve`].
//!
//! ### Sync
//!
//! A [`SyncEntity`] defines a collection and its merge function. The
//! [`SyncEngine`] pushes unsynced documents to a [`RemoteStore`] and merges
//! remote snapshots back in.
//!
//! ## Quick Start
//!
//! ```rust
//! use tidepool_engine::{Database, LiveQuery, ManualClock, Todo, sync};
//! use serde_json::json;
//!
//! let db = Database::builder()
//!     .clock(ManualClock::new(1_706_745_600_000))
//!     .with_entity::<Todo>()
//!     .open()
//!     .unwrap();
//!
//! let open_todos = LiveQuery::new("openTodos", |reader, _args| {
//!     let docs = reader
//!         .query("todos")
//!         .filter(|doc| doc.get("completed") == Some(&json!(false)))?
//!         .collect()?;
//!     Ok(json!(docs.len()))
//! });
//! let _subscription = db.subscribe(&open_todos, json!({}), || {}).unwrap();
//!
//! sync::insert_entity(&db, &Todo::new("buy milk", db.now())).unwrap();
//! assert_eq!(db.retrieve(&open_todos, "{}").unwrap(), Some(json!(1)));
//! ```

pub mod clock;
pub mod database;
pub mod document;
pub mod entity;
pub mod error;
pub mod merge;
pub mod models;
pub mod persistence;
pub mod query;
pub mod reactive;
pub mod remote;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{Database, DatabaseBuilder, DEFAULT_CHANGE_CAPACITY};
pub use document::Document;
pub use entity::{LocalDocument, SyncEntity, WireDocument};
pub use error::{ClosedReason, Error, Result};
pub use models::{NumberEntry, Todo};
pub use persistence::{FileBackend, MemoryBackend, PersistenceBackend};
pub use query::{Cursor, IndexRange, Order, Query, QueryPhase, QueryPlan};
pub use reactive::{serialize_args, LiveQuery, Reader, Subscription};
pub use remote::{AddOutcome, AuthoritativeTable, InMemoryRemote, RemoteSnapshot, RemoteStore};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};
pub use snapshot::{CollectionSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{ChangeEvent, ChangeKind, DocumentStore};
pub use sync::{ApplyReport, PushReport, SyncEngine};

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
