use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::models::User;

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Session id accepted, no member yet.
    Connecting,
    /// Member added, nothing received since.
    Joined,
    Active,
    Idle,
    Disconnected,
}

impl ConnState {
    pub fn is_member(&self) -> bool {
        matches!(self, ConnState::Joined | ConnState::Active | ConnState::Idle)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Connecting => "connecting",
            ConnState::Joined => "joined",
            ConnState::Active => "active",
            ConnState::Idle => "idle",
            ConnState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Per-connection context.
#[derive(Clone, Debug)]
pub struct ConnCtx {
    /// Unique per transport connection. Also the rate-limiting identity.
    pub conn_id: String,
    pub session_id: String,
    pub user: Option<User>,
    pub state: ConnState,
    pub last_inbound: Instant,
}

impl ConnCtx {
    pub fn new(session_id: String) -> Self {
        Self {
            conn_id: Uuid::new_v4().to_string(),
            session_id,
            user: None,
            state: ConnState::Connecting,
            last_inbound: Instant::now(),
        }
    }

    /// Record an inbound event. A member becomes active again.
    pub fn touch(&mut self, now: Instant) {
        self.last_inbound = now;
        if self.state.is_member() {
            self.state = ConnState::Active;
        }
    }

    /// Move an active member to idle after `idle_after` without input.
    /// Returns true on transition.
    pub fn check_idle(&mut self, now: Instant, idle_after: Duration) -> bool {
        let quiet = now.saturating_duration_since(self.last_inbound) >= idle_after;
        if quiet && matches!(self.state, ConnState::Joined | ConnState::Active) {
            self.state = ConnState::Idle;
            return true;
        }
        false
    }
}
