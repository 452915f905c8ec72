use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::services::{RateLimiter, SessionService};
use crate::store::{MemorySessionStore, RedisSessionStore, SessionStore, StoreError};
use crate::ws::RoomRegistry;

/// Live connection gauges for diagnostics.
#[derive(Default, Debug)]
pub struct ConnMetrics {
    pub n_conn: AtomicU64,
    pub n_joined: AtomicU64,
}

impl ConnMetrics {
    /// Count a live connection until the returned gauge is dropped,
    /// including when the connection task is aborted.
    pub fn track_connection(self: &Arc<Self>) -> ConnGauge {
        self.n_conn.fetch_add(1, Ordering::Relaxed);
        ConnGauge(self.clone())
    }

    pub fn member_joined(&self) {
        self.n_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn member_left(&self) {
        self.n_joined.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connections(&self) -> u64 {
        self.n_conn.load(Ordering::Relaxed)
    }

    pub fn members(&self) -> u64 {
        self.n_joined.load(Ordering::Relaxed)
    }
}

pub struct ConnGauge(Arc<ConnMetrics>);

impl Drop for ConnGauge {
    fn drop(&mut self) {
        self.0.n_conn.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub sessions: SessionService,
    pub rooms: RoomRegistry,
    pub rate_limiter: RateLimiter,
    pub metrics: Arc<ConnMetrics>,
}

impl AppState {
    /// In-memory sessions, whatever the config says.
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_store(config, Arc::new(MemorySessionStore::default()))
    }

    /// Use Redis when `redis_url` is configured, process memory otherwise.
    pub async fn connect(config: Config) -> Result<Arc<Self>, StoreError> {
        let store: Arc<dyn SessionStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisSessionStore::connect(url).await?),
            None => {
                warn!("REDIS_URL is not set, sessions are kept in memory");
                Arc::new(MemorySessionStore::default())
            }
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn SessionStore>) -> Arc<Self> {
        let sessions = SessionService::new(store, config.session_policy());
        let rooms = RoomRegistry::new(config.room_capacity);
        let rate_limiter = RateLimiter::new(
            config.rate_limit_rules(),
            Duration::from_secs(config.rate_limit_idle_secs.max(1)),
        );
        Arc::new(Self { config, sessions, rooms, rate_limiter, metrics: Arc::new(ConnMetrics::default()) })
    }
}
