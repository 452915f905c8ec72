use std::sync::{Arc, Mutex, OnceLock};

use axum::{extract::State, http::StatusCode, Json};
use sysinfo::System;
use tracing::info;

use crate::models::DiagnosticsResponse;
use crate::state::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Connection, room and session counters plus process-wide CPU and memory.
pub async fn diagnostics(State(app_state): State<Arc<AppState>>) -> (StatusCode, Json<DiagnosticsResponse>) {
    let n_conn = app_state.metrics.connections();
    let n_joined = app_state.metrics.members();
    let n_rooms = app_state.rooms.room_count().await as u32;
    let n_room_members = app_state.rooms.member_count().await as u32;
    let n_sessions = app_state.sessions.store().len();
    let n_rate_limited_clients = app_state.rate_limiter.tracked_clients();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Joined: {}, Rooms: {}, Sessions: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_joined,
        n_rooms,
        n_sessions
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_joined,
            n_rooms,
            n_room_members,
            n_sessions,
            n_rate_limited_clients,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
