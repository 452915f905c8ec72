use crate::{handlers::diagnostics, handlers::health_check, handlers::ready_check, state::AppState, websocket::websocket_handler};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/ws", get(websocket_handler))
        .with_state(app_state)
}
