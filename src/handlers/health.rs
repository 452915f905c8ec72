use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, warn};

use crate::models::{ErrorResponse, HealthResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: app_state.config.service_name.clone(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Not ready while the session store is unhealthy.
pub async fn ready_check(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    if !app_state.sessions.store().is_healthy() {
        warn!("Readiness check failed: session store unavailable");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(StatusCode::SERVICE_UNAVAILABLE, "Session store unavailable")),
        ));
    }
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        service: app_state.config.service_name.clone(),
        message: "Service is ready".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::flaky::FlakyStore;

    #[tokio::test]
    async fn readiness_follows_the_store() {
        let store = Arc::new(FlakyStore::default());
        let app = AppState::with_store(Config::default(), store.clone());
        assert!(ready_check(State(app.clone())).await.is_ok());

        store.set_failing(true);
        let (status, Json(body)) = ready_check(State(app.clone())).await.err().unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, 503);
        // Liveness does not depend on the store
        assert_eq!(health_check(State(app.clone())).await.status, "ok");

        store.set_failing(false);
        assert!(ready_check(State(app)).await.is_ok());
    }
}
