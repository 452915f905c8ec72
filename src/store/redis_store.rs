//! Session records in Redis, shared by every gateway instance.
//!
//! Each record is one string key. TTLs are native key expirations, so a
//! record that outlives its TTL is gone for every reader at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{RedisError, RedisResult};
use tracing::{error, info, warn};

use super::{session_key, SessionStore, StoreError, SESSION_KEY_PREFIX};
use crate::models::Session;

const SCAN_BATCH: usize = 200;

/// Redis-backed store. Cloning the connection manager is cheap and every
/// clone multiplexes over the same connection.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    healthy: AtomicBool,
    last_count: AtomicU64,
}

impl RedisSessionStore {
    /// Connect to `url` (`redis://host:port/db`). Fails if the server
    /// can't be reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(2)
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(5));
        let conn = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(unavailable)?;
        info!("Connected to session store at {}", redact(url));
        Ok(Self { conn, healthy: AtomicBool::new(true), last_count: AtomicU64::new(0) })
    }

    /// Record the outcome of one round trip in the health flag.
    fn track<T>(&self, result: RedisResult<T>) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                if !self.healthy.swap(true, Ordering::Relaxed) {
                    info!("Session store is reachable again");
                }
                Ok(value)
            }
            Err(e) => {
                if self.healthy.swap(false, Ordering::Relaxed) {
                    warn!("Session store became unavailable: {}", e);
                }
                Err(unavailable(e))
            }
        }
    }

    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", SESSION_KEY_PREFIX);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self.track(
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await,
            )?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Drop credentials from a connection url before logging it.
fn redact(url: &str) -> &str {
    url.rsplit_once('@').map_or(url, |(_, host)| host)
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> =
            self.track(redis::cmd("GET").arg(session_key(session_id)).query_async(&mut conn).await)?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = self.track(
            redis::cmd("SET")
                .arg(session_key(&session.id))
                .arg(payload)
                .arg("KEEPTTL")
                .query_async(&mut conn)
                .await,
        )?;
        Ok(())
    }

    async fn put_with_ttl(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = self.track(
            redis::cmd("SET")
                .arg(session_key(&session.id))
                .arg(payload)
                .arg("PX")
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await,
        )?;
        Ok(())
    }

    async fn expire(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.track(
            redis::cmd("PEXPIRE")
                .arg(session_key(session_id))
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await,
        )
    }

    async fn ttl(&self, session_id: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let remaining: i64 =
            self.track(redis::cmd("PTTL").arg(session_key(session_id)).query_async(&mut conn).await)?;
        // -2: no such key, -1: no expiration
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self.track(redis::cmd("DEL").arg(session_key(session_id)).query_async(&mut conn).await)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let keys = self.scan_keys().await?;
        let mut sessions = Vec::with_capacity(keys.len());
        let mut conn = self.conn.clone();
        for chunk in keys.chunks(SCAN_BATCH) {
            let payloads: Vec<Option<String>> =
                self.track(redis::cmd("MGET").arg(chunk).query_async(&mut conn).await)?;
            for (key, payload) in chunk.iter().zip(payloads) {
                // Expired between SCAN and MGET
                let Some(payload) = payload else { continue };
                match serde_json::from_str::<Session>(&payload) {
                    Ok(session) => sessions.push(session),
                    Err(e) => error!("Skipping undecodable record {}: {}", key, e),
                }
            }
        }
        self.last_count.store(sessions.len() as u64, Ordering::Relaxed);
        Ok(sessions)
    }

    /// Count seen by the most recent [`SessionStore::list`].
    fn len(&self) -> u64 {
        self.last_count.load(Ordering::Relaxed)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
