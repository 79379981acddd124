//! Error types for the Tidepool engine.

use crate::{CollectionName, DocumentId};
use std::fmt;
use thiserror::Error;

/// Why a query stage can no longer be iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    /// The stage was chained into another stage (or prepared into a plan).
    Chained,
    /// Iteration ran to completion or the cursor was dropped.
    Consumed,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedReason::Chained => write!(
                f,
                "this query has been chained with another operator and can't be reused"
            ),
            ClosedReason::Consumed => {
                write!(f, "this query is closed and can't emit any more values")
            }
        }
    }
}

/// All possible errors from the Tidepool engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Argument errors
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("system field '{0}' is assigned by the store")]
    SystemField(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("document id already exists: {0}")]
    DuplicateId(DocumentId),

    // Query pipeline errors
    #[error("a query can only be chained once")]
    AlreadyChained,

    #[error("iteration has already begun on this query")]
    IterationAlreadyBegun,

    #[error("{0}")]
    QueryClosed(ClosedReason),

    #[error("queries may only specify order at most once")]
    OrderAlreadySet,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unique() query on '{0}' returned more than one result")]
    MultipleResults(CollectionName),

    // Sync errors
    #[error("document is missing its identity field '{0}'")]
    MissingIdentity(&'static str),

    #[error("malformed document {id} in '{collection}': {reason}")]
    MalformedDocument {
        collection: CollectionName,
        id: DocumentId,
        reason: String,
    },

    #[error("remote store error: {0}")]
    Remote(String),

    // Infrastructure errors
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
