//! Table endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tidepool_engine::AddOutcome;

use crate::error::Result;
use crate::handlers::{handle_add, handle_list, AddRequest, ListQuery};
use crate::state::Table;
use crate::AppState;

/// Create table routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/{table}", get(list_handler).post(add_handler))
}

/// GET /api/{table} - Newest documents of a table.
async fn list_handler(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Value>>> {
    let table: Table = table.parse()?;
    let documents = handle_list(&state, table, query.count).await?;
    Ok(Json(documents))
}

/// POST /api/{table} - Insert or merge documents.
async fn add_handler(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(request): Json<AddRequest>,
) -> Result<Json<AddOutcome>> {
    let table: Table = table.parse()?;
    let outcome = handle_add(&state, table, request.documents).await?;
    Ok(Json(outcome))
}
