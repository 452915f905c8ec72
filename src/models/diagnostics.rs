use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct DiagnosticsResponse {
    pub n_conn: u64,
    pub n_joined: u64,
    pub n_rooms: u32,
    pub n_room_members: u32,
    pub n_sessions: u64,
    pub n_rate_limited_clients: u64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
