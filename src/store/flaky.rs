//! Test backend whose writes can be switched off, to exercise the
//! store-failure paths without a real server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{MemorySessionStore, SessionStore, StoreError};
use crate::models::Session;

#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySessionStore,
    failing: AtomicBool,
}

impl FlakyStore {
    /// While set, every write fails and the store reports unhealthy.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.get(session_id).await
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(session).await
    }

    async fn put_with_ttl(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put_with_ttl(session, ttl).await
    }

    async fn expire(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(session_id, ttl).await
    }

    async fn ttl(&self, session_id: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.ttl(session_id).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(session_id).await
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.inner.list().await
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::Relaxed)
    }
}
