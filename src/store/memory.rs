use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use tracing::{debug, error};

use super::{session_key, SessionStore, StoreError, SESSION_KEY_PREFIX};
use crate::models::Session;

#[derive(Clone, Debug)]
struct StoredRecord {
    payload: Arc<str>,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Expires each entry at the absolute deadline stored in the record.
struct RecordExpiry;

impl Expiry<String, StoredRecord> for RecordExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredRecord,
        created_at: Instant,
    ) -> Option<Duration> {
        value.remaining(created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredRecord,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.remaining(updated_at)
    }
}

/// In-process session store with Redis-like per-key TTLs.
#[derive(Clone)]
pub struct MemorySessionStore {
    cache: Cache<String, StoredRecord>,
}

impl MemorySessionStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(RecordExpiry)
            .build();
        Self { cache }
    }

    async fn live_record(&self, key: &String) -> Option<StoredRecord> {
        self.cache
            .get(key)
            .await
            .filter(|record| !record.is_expired(Instant::now()))
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let key = session_key(session_id);
        match self.live_record(&key).await {
            Some(record) => Ok(Some(serde_json::from_str(&record.payload)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let key = session_key(&session.id);
        let payload = serde_json::to_string(session)?;
        let expires_at = self.live_record(&key).await.and_then(|record| record.expires_at);
        self.cache
            .insert(key, StoredRecord { payload: payload.into(), expires_at })
            .await;
        Ok(())
    }

    async fn put_with_ttl(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)?;
        let record = StoredRecord { payload: payload.into(), expires_at: Some(Instant::now() + ttl) };
        self.cache.insert(session_key(&session.id), record).await;
        Ok(())
    }

    async fn expire(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = session_key(session_id);
        let Some(record) = self.live_record(&key).await else {
            return Ok(false);
        };
        debug!("Setting TTL of {} to {:?}", key, ttl);
        let updated = StoredRecord { payload: record.payload, expires_at: Some(Instant::now() + ttl) };
        self.cache.insert(key, updated).await;
        Ok(true)
    }

    async fn ttl(&self, session_id: &str) -> Result<Option<Duration>, StoreError> {
        let key = session_key(session_id);
        Ok(self
            .live_record(&key)
            .await
            .and_then(|record| record.remaining(Instant::now())))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.cache.invalidate(&session_key(session_id)).await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let now = Instant::now();
        let mut sessions = Vec::new();
        for (key, record) in self.cache.iter() {
            if !key.starts_with(SESSION_KEY_PREFIX) || record.is_expired(now) {
                continue;
            }
            match serde_json::from_str::<Session>(&record.payload) {
                Ok(session) => sessions.push(session),
                // One corrupt record must not hide the others from the sweep
                Err(e) => error!("Skipping undecodable record {}: {}", key, e),
            }
        }
        Ok(sessions)
    }

    fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
