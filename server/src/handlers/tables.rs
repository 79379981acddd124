//! List and add handlers, shared by the HTTP routes and the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_engine::{AddOutcome, SyncEntity, WireDocument};

use crate::error::{AppError, Result};
use crate::state::{AppState, SharedTable, Table};

/// Query parameters for a list request.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// How many of the newest documents to return
    pub count: Option<usize>,
}

/// Request body for an add request.
#[derive(Debug, Deserialize, Serialize)]
pub struct AddRequest {
    /// Documents in wire shape
    pub documents: Vec<Value>,
}

/// The newest documents of `table`, oldest first.
pub async fn handle_list(state: &AppState, table: Table, count: Option<usize>) -> Result<Vec<Value>> {
    let count = state.config.list_count(count);
    match table {
        Table::Todos => list_table(&state.todos, count).await,
        Table::Numbers => list_table(&state.numbers, count).await,
    }
}

/// Insert or merge a batch into `table`.
///
/// Every document is decoded before any is written.
pub async fn handle_add(state: &AppState, table: Table, documents: Vec<Value>) -> Result<AddOutcome> {
    if documents.is_empty() {
        return Ok(AddOutcome::default());
    }
    match table {
        Table::Todos => state.todos.add(decode(documents)?).await,
        Table::Numbers => state.numbers.add(decode(documents)?).await,
    }
}

async fn list_table<E>(table: &SharedTable<E>, count: usize) -> Result<Vec<Value>>
where
    E: SyncEntity + Send + Sync,
{
    table
        .list(count)
        .await
        .iter()
        .map(|doc| serde_json::to_value(doc).map_err(|e| AppError::Internal(e.to_string())))
        .collect()
}

fn decode<E: SyncEntity>(documents: Vec<Value>) -> Result<Vec<WireDocument<E>>> {
    documents
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(AppError::from))
        .collect()
}
