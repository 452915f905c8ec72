//! Key-value persistence of session records with per-key expiration.
//!
//! Records are JSON documents stored under `session:<id>`. A plain
//! [`SessionStore::put`] keeps whatever TTL the key already carries.
//! [`SessionStore::put_with_ttl`] writes the record and its TTL in one
//! step, so a failure leaves the previous record untouched.

pub mod memory;
pub mod redis_store;

#[cfg(test)]
pub(crate) mod flaky;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Session;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;

pub const SESSION_KEY_PREFIX: &str = "session:";

pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode or decode session record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Returns `Ok(None)` if it doesn't exist or has expired.
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Write a session, keeping the key's current TTL.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Write a session and set it to expire `ttl` from now, atomically.
    async fn put_with_ttl(&self, session: &Session, ttl: Duration) -> Result<(), StoreError>;

    /// Set the key to expire `ttl` from now. Returns false if the key is absent.
    async fn expire(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining time to live, `None` if the key is absent or never expires.
    async fn ttl(&self, session_id: &str) -> Result<Option<Duration>, StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Every live session record.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;

    /// Approximate number of stored records.
    fn len(&self) -> u64;

    /// False once the backend stopped answering. Cleared by the next
    /// successful operation.
    fn is_healthy(&self) -> bool;
}
