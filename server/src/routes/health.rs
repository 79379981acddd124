//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tables: TableCounts,
}

/// Row count per hosted table.
#[derive(Serialize)]
pub struct TableCounts {
    pub todos: usize,
    pub numbers: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tables: TableCounts {
            todos: state.todos.len().await,
            numbers: state.numbers.len().await,
        },
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tidepool Reference Server"
}
