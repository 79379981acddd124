//! Tidepool reference server.
//!
//! Hosts the authoritative `todos` and `numbers` tables in memory and exposes
//! the remote store interface over HTTP (`list`, `add`) and WebSocket
//! (`watch` with live snapshots).

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use state::{AppState, SharedTable, Table};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn routes_resolve() {
        let router = app(AppState::new(Config::default()));
        assert_eq!(status(router.clone(), "/health").await, StatusCode::OK);
        assert_eq!(status(router.clone(), "/api/todos").await, StatusCode::OK);
        assert_eq!(status(router.clone(), "/api/users").await, StatusCode::NOT_FOUND);
        assert_eq!(status(router, "/api/todos?count=x").await, StatusCode::BAD_REQUEST);
    }
}
