use collabx_sync::config::Config;
use collabx_sync::{create_router, spawn_session_sweeper, AppState};
use std::panic;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so the log level can come from it
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("collabx_sync={},tower_http=debug,axum::rejection=trace,info", config.log_level).into()
        }))
        .init();

    info!("Starting server...");
    if let Err(e) = loaded {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }

    let address = config.server_address();
    let app_state = match AppState::connect(config).await {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to open the session store: {}", e);
            std::process::exit(1);
        }
    };
    let _sweeper = spawn_session_sweeper(app_state.clone());
    let app_routes = create_router(app_state);

    // Start the HTTP/API server
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/api/ws?sessionId=<id>", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes).await {
        error!("Server error: {}", e);
    }
}
