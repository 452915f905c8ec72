use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Session store unavailable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Runtime diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Connection, room and session counters", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Collaborative editing socket. Frames are JSON `{"event", "data"}` objects.
#[utoipa::path(
    get,
    path = "/api/ws",
    params(
        ("sessionId" = String, Query, description = "Session to connect to, letters and digits")
    ),
    responses(
        (status = 101, description = "Switching protocols to WebSocket")
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        websocket_doc,
    ),
    components(
        schemas(HealthResponse, ErrorResponse, DiagnosticsResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
