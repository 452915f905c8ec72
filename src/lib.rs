pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod websocket;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::routes::create_api_routes;

pub use crate::state::AppState;

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = config.cors_origin_list();
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
}

/// The full HTTP application: API routes, Swagger UI, CORS and tracing.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config);
    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(app_state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}

/// Periodically delete sessions that saw no activity within the
/// inactivity timeout, whatever their store TTL.
pub fn spawn_session_sweeper(app_state: Arc<AppState>) -> JoinHandle<()> {
    let period = app_state.config.cleanup_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match app_state.sessions.cleanup_inactive_sessions().await {
                Ok(0) => debug!("Session sweep found nothing to delete"),
                Ok(deleted) => info!("Session sweep deleted {} inactive sessions", deleted),
                Err(e) => error!("Session sweep failed: {}", e),
            }
        }
    })
}
