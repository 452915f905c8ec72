use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::EventKind;
use crate::services::rate_limiter::{RateLimitRule, RateLimitRules};
use crate::services::session_service::SessionPolicy;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level for this crate when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Session store url. Sessions stay in process memory when unset.
    pub redis_url: Option<String>,

    // Session policy
    #[serde(default = "default_max_users_per_session")]
    pub max_users_per_session: usize,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_empty_session_ttl_secs")]
    pub empty_session_ttl_secs: u64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Accept `-` and `_` in session ids in addition to letters and digits
    #[serde(default)]
    pub session_id_allow_separators: bool,

    // Rate limits, one fixed window per event type
    #[serde(default = "default_join_rate_max")]
    pub join_rate_max: u32,
    #[serde(default = "default_join_rate_window_ms")]
    pub join_rate_window_ms: u64,
    #[serde(default = "default_content_rate_max")]
    pub content_rate_max: u32,
    #[serde(default = "default_content_rate_window_ms")]
    pub content_rate_window_ms: u64,
    #[serde(default = "default_cursor_rate_max")]
    pub cursor_rate_max: u32,
    #[serde(default = "default_cursor_rate_window_ms")]
    pub cursor_rate_window_ms: u64,
    #[serde(default = "default_typing_rate_max")]
    pub typing_rate_max: u32,
    #[serde(default = "default_typing_rate_window_ms")]
    pub typing_rate_window_ms: u64,
    #[serde(default = "default_rate_limit_idle_secs")]
    pub rate_limit_idle_secs: u64,

    // Transport
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_idle_after_secs")]
    pub idle_after_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        envy::from_env::<Config>().map_err(ConfigError::EnvError)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    /// Parsed list of allowed CORS origins. Empty means any origin.
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_users: self.max_users_per_session,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            empty_session_ttl: Duration::from_secs(self.empty_session_ttl_secs),
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout_secs),
        }
    }

    pub fn rate_limit_rules(&self) -> RateLimitRules {
        RateLimitRules::new()
            .with_rule(
                EventKind::Join,
                RateLimitRule::new(self.join_rate_max, self.join_rate_window_ms)
                    .with_message("Too many join attempts. Please try again later."),
            )
            .with_rule(
                EventKind::ContentChange,
                RateLimitRule::new(self.content_rate_max, self.content_rate_window_ms)
                    .with_message("Too many content changes. Please wait a moment."),
            )
            .with_rule(
                EventKind::CursorMove,
                RateLimitRule::new(self.cursor_rate_max, self.cursor_rate_window_ms)
                    .with_message("Too many cursor movements. Please wait a moment."),
            )
            .with_rule(
                EventKind::TypingStatus,
                RateLimitRule::new(self.typing_rate_max, self.typing_rate_window_ms)
                    .with_message("Too many typing updates. Please wait a moment."),
            )
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            service_name: default_service_name(),
            redis_url: None,
            max_users_per_session: default_max_users_per_session(),
            session_ttl_secs: default_session_ttl_secs(),
            empty_session_ttl_secs: default_empty_session_ttl_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            session_id_allow_separators: false,
            join_rate_max: default_join_rate_max(),
            join_rate_window_ms: default_join_rate_window_ms(),
            content_rate_max: default_content_rate_max(),
            content_rate_window_ms: default_content_rate_window_ms(),
            cursor_rate_max: default_cursor_rate_max(),
            cursor_rate_window_ms: default_cursor_rate_window_ms(),
            typing_rate_max: default_typing_rate_max(),
            typing_rate_window_ms: default_typing_rate_window_ms(),
            rate_limit_idle_secs: default_rate_limit_idle_secs(),
            room_capacity: default_room_capacity(),
            outbox_capacity: default_outbox_capacity(),
            idle_after_secs: default_idle_after_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "collabx-sync".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_max_users_per_session() -> usize {
    5
}

fn default_session_ttl_secs() -> u64 {
    4 * 60 * 60
}

fn default_empty_session_ttl_secs() -> u64 {
    60 * 60
}

fn default_inactivity_timeout_secs() -> u64 {
    15 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_join_rate_max() -> u32 {
    5
}

fn default_join_rate_window_ms() -> u64 {
    60_000
}

fn default_content_rate_max() -> u32 {
    10
}

fn default_content_rate_window_ms() -> u64 {
    1_000
}

fn default_cursor_rate_max() -> u32 {
    30
}

fn default_cursor_rate_window_ms() -> u64 {
    100
}

fn default_typing_rate_max() -> u32 {
    10
}

fn default_typing_rate_window_ms() -> u64 {
    1_000
}

fn default_rate_limit_idle_secs() -> u64 {
    60 * 60
}

fn default_room_capacity() -> usize {
    256
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_idle_after_secs() -> u64 {
    30
}
