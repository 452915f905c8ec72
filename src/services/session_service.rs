//! Session lifecycle and membership rules on top of a [`SessionStore`].
//!
//! Every read-modify-write of a session runs while holding that session's
//! lock, so concurrent writers are serialized per session id and content
//! stays last-write-wins without lost updates. Callers that must publish
//! a change in the same order it was written hold a [`LockedSession`]
//! across both steps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

use crate::models::{ErrorKind, ErrorPayload, Language, Session, User};
use crate::store::{SessionStore, StoreError};
use crate::utils::KeyedLock;

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub max_users: usize,
    /// TTL while the session has members.
    pub session_ttl: Duration,
    /// TTL once the last member has left.
    pub empty_session_ttl: Duration,
    /// Sessions idle for longer than this are swept regardless of TTL.
    pub inactivity_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_users: 5,
            session_ttl: Duration::from_secs(4 * 60 * 60),
            empty_session_ttl: Duration::from_secs(60 * 60),
            inactivity_timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("Session is full ({max} users maximum)")]
    SessionFull { max: usize },
    #[error("Session '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// The client-facing error, for the cases a client can act on.
    /// A store failure is reported so the client can retry.
    pub fn to_payload(&self) -> Option<ErrorPayload> {
        match self {
            SessionError::DuplicateUsername(_) => {
                Some(ErrorPayload::new(ErrorKind::DuplicateUsername, self.to_string()))
            }
            SessionError::SessionFull { .. } => {
                Some(ErrorPayload::new(ErrorKind::SessionFull, self.to_string()))
            }
            SessionError::Store(_) => Some(ErrorPayload::new(
                ErrorKind::ServiceUnavailable,
                "Session storage is temporarily unavailable. Please try again.",
            )),
            SessionError::NotFound(_) => None,
        }
    }
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    locks: KeyedLock,
    policy: SessionPolicy,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, policy: SessionPolicy) -> Self {
        Self { store, locks: KeyedLock::new(), policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Take the session's write lock. Waiters are served in arrival order.
    pub async fn lock(&self, session_id: &str) -> LockedSession<'_> {
        let guard = self.locks.acquire(session_id).await;
        LockedSession { service: self, session_id: session_id.to_string(), cached: None, _guard: guard }
    }

    /// Read without locking. May observe a state that is about to change.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.store.get(session_id).await?)
    }

    pub async fn get_or_create_session(&self, session_id: &str) -> Result<Session, SessionError> {
        self.lock(session_id).await.get_or_create().await
    }

    pub async fn add_user_to_session(&self, session_id: &str, username: &str) -> Result<User, SessionError> {
        self.lock(session_id).await.add_user(username).await
    }

    /// Idempotent. Returns the removed user, `None` if it was not a member.
    pub async fn remove_user_from_session(&self, session_id: &str, user_id: &str) -> Result<Option<User>, SessionError> {
        self.lock(session_id).await.remove_user(user_id).await
    }

    pub async fn update_session_content(&self, session_id: &str, content: &str) -> Result<(), SessionError> {
        self.lock(session_id).await.update_content(None, content).await?;
        Ok(())
    }

    pub async fn update_session_language(&self, session_id: &str, language: Language) -> Result<(), SessionError> {
        self.lock(session_id).await.update_language(None, language).await?;
        Ok(())
    }

    pub async fn session_ttl(&self, session_id: &str) -> Result<Option<Duration>, SessionError> {
        Ok(self.store.ttl(session_id).await?)
    }

    /// Delete every session idle for longer than the inactivity timeout.
    /// Returns the number of deleted sessions.
    pub async fn cleanup_inactive_sessions(&self) -> Result<usize, SessionError> {
        self.cleanup_inactive_sessions_at(Utc::now()).await
    }

    pub async fn cleanup_inactive_sessions_at(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let timeout = chrono::Duration::from_std(self.policy.inactivity_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let is_stale = |session: &Session| now.signed_duration_since(session.last_active) >= timeout;

        let mut deleted = 0;
        for candidate in self.store.list().await? {
            if !is_stale(&candidate) {
                continue;
            }
            // Re-check under the lock: a writer may have refreshed it meanwhile
            let _guard = self.locks.acquire(&candidate.id).await;
            match self.store.get(&candidate.id).await {
                Ok(Some(current)) if is_stale(&current) => {
                    self.store.delete(&current.id).await?;
                    info!("Deleted inactive session {} (last active {})", current.id, current.last_active);
                    deleted += 1;
                }
                Ok(_) => {}
                Err(e) => error!("Failed to re-read session {} during cleanup: {}", candidate.id, e),
            }
        }
        Ok(deleted)
    }
}

/// Exclusive access to one session for a sequence of operations.
pub struct LockedSession<'a> {
    service: &'a SessionService,
    session_id: String,
    cached: Option<Session>,
    _guard: OwnedMutexGuard<()>,
}

impl LockedSession<'_> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn store(&self) -> &dyn SessionStore {
        self.service.store.as_ref()
    }

    async fn load(&mut self) -> Result<Option<Session>, SessionError> {
        if self.cached.is_none() {
            self.cached = self.store().get(&self.session_id).await?;
        }
        Ok(self.cached.clone())
    }

    /// Write keeping the current TTL. On failure the stored record and
    /// the cached copy are both unchanged.
    async fn save(&mut self, session: Session) -> Result<(), SessionError> {
        self.store().put(&session).await?;
        self.cached = Some(session);
        Ok(())
    }

    /// Write the record and its new TTL as one store operation.
    async fn save_with_ttl(&mut self, session: Session, ttl: Duration) -> Result<(), SessionError> {
        self.store().put_with_ttl(&session, ttl).await?;
        self.cached = Some(session);
        Ok(())
    }

    async fn load_existing(&mut self) -> Result<Session, SessionError> {
        self.load()
            .await?
            .ok_or_else(|| SessionError::NotFound(self.session_id.clone()))
    }

    /// Current state, without creating the session.
    pub async fn snapshot(&mut self) -> Result<Option<Session>, SessionError> {
        self.load().await
    }

    /// Whether `user_id` is currently a member. False if the session is gone.
    pub async fn has_member(&mut self, user_id: &str) -> Result<bool, SessionError> {
        Ok(self
            .load()
            .await?
            .is_some_and(|session| session.users.contains_key(user_id)))
    }

    pub async fn get_or_create(&mut self) -> Result<Session, SessionError> {
        if let Some(session) = self.load().await? {
            return Ok(session);
        }

        let session = Session::new(&self.session_id, Utc::now());
        self.save_with_ttl(session.clone(), self.service.policy.session_ttl).await?;
        info!("Created session {}", self.session_id);
        Ok(session)
    }

    /// Add a member. A duplicate username is reported before capacity.
    pub async fn add_user(&mut self, username: &str) -> Result<User, SessionError> {
        let mut session = self.get_or_create().await?;

        if session.has_username(username) {
            return Err(SessionError::DuplicateUsername(username.to_string()));
        }
        let max = self.service.policy.max_users;
        if session.users.len() >= max {
            return Err(SessionError::SessionFull { max });
        }

        let now = Utc::now();
        let user = User::new(&self.session_id, username, now);
        session.users.insert(user.id.clone(), user.clone());
        session.touch(now);
        self.save_with_ttl(session, self.service.policy.session_ttl).await?;

        debug!("User {} ({}) joined session {}", user.username, user.id, self.session_id);
        Ok(user)
    }

    pub async fn remove_user(&mut self, user_id: &str) -> Result<Option<User>, SessionError> {
        let Some(mut session) = self.load().await? else {
            return Ok(None);
        };
        let Some(user) = session.users.remove(user_id) else {
            return Ok(None);
        };

        session.touch(Utc::now());
        if session.is_empty() {
            self.save_with_ttl(session, self.service.policy.empty_session_ttl).await?;
            debug!("Session {} is empty, shortened its TTL", self.session_id);
        } else {
            self.save(session).await?;
        }

        debug!("User {} ({}) left session {}", user.username, user.id, self.session_id);
        Ok(Some(user))
    }

    /// Replace the content. `actor` is the editing user, whose activity
    /// is refreshed with the session's; the refreshed user is returned.
    pub async fn update_content(&mut self, actor: Option<&str>, content: &str) -> Result<Option<User>, SessionError> {
        let mut session = self.load_existing().await?;
        session.content = content.to_string();
        self.commit_edit(session, actor).await
    }

    pub async fn update_language(
        &mut self,
        actor: Option<&str>,
        language: Language,
    ) -> Result<Option<User>, SessionError> {
        let mut session = self.load_existing().await?;
        session.language = language;
        self.commit_edit(session, actor).await
    }

    async fn commit_edit(&mut self, mut session: Session, actor: Option<&str>) -> Result<Option<User>, SessionError> {
        let now = Utc::now();
        session.touch(now);
        let mut refreshed = None;
        if let Some(user_id) = actor {
            if let Some(user) = session.users.get_mut(user_id) {
                user.touch(now);
                refreshed = Some(user.clone());
            }
        }
        if session.is_empty() {
            self.save(session).await?;
        } else {
            self.save_with_ttl(session, self.service.policy.session_ttl).await?;
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::flaky::FlakyStore;
    use crate::store::MemorySessionStore;

    fn service() -> SessionService {
        SessionService::new(Arc::new(MemorySessionStore::default()), SessionPolicy::default())
    }

    #[tokio::test]
    async fn get_or_create_initializes_defaults_once() {
        let svc = service();
        let created = svc.get_or_create_session("abc123").await.unwrap();
        assert_eq!(created.content, "");
        assert_eq!(created.language, Language::JavaScript);
        assert!(created.users.is_empty());
        assert!(created.last_active >= created.created_at);

        svc.update_session_content("abc123", "x=1").await.unwrap();
        let again = svc.get_or_create_session("abc123").await.unwrap();
        assert_eq!(again.content, "x=1");
        assert_eq!(again.created_at, created.created_at);

        let ttl = svc.session_ttl("abc123").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(4 * 60 * 60 - 10));
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let svc = service();
        for i in 0..5 {
            svc.add_user_to_session("full", &format!("user{i}")).await.unwrap();
        }
        let err = svc.add_user_to_session("full", "late").await.unwrap_err();
        assert!(matches!(err, SessionError::SessionFull { max: 5 }));
        assert_eq!(err.to_payload().unwrap().kind, ErrorKind::SessionFull);

        let session = svc.get_session("full").await.unwrap().unwrap();
        assert_eq!(session.users.len(), 5);
        assert!(!session.has_username("late"));
    }

    #[tokio::test]
    async fn duplicate_username_wins_over_full() {
        let svc = service();
        for i in 0..5 {
            svc.add_user_to_session("s", &format!("user{i}")).await.unwrap();
        }
        let err = svc.add_user_to_session("s", "user0").await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateUsername(ref name) if name == "user0"));
        assert_eq!(err.to_payload().unwrap().kind, ErrorKind::DuplicateUsername);
    }

    #[tokio::test]
    async fn duplicate_username_leaves_state_unchanged() {
        let svc = service();
        svc.add_user_to_session("s", "alice").await.unwrap();
        let before = svc.get_session("s").await.unwrap().unwrap();

        assert!(svc.add_user_to_session("s", "alice").await.is_err());
        let after = svc.get_session("s").await.unwrap().unwrap();
        assert_eq!(before, after);
        // Case-sensitive match
        assert!(svc.add_user_to_session("s", "Alice").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_joins_never_exceed_capacity() {
        let svc = Arc::new(service());
        let mut tasks = Vec::new();
        for i in 0..20 {
            let svc = svc.clone();
            tasks.push(tokio::spawn(async move { svc.add_user_to_session("race", &format!("u{i}")).await }));
        }
        let mut joined = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                joined += 1;
            }
        }
        assert_eq!(joined, 5);
        assert_eq!(svc.get_session("race").await.unwrap().unwrap().users.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_content_writes_are_not_lost_with_membership() {
        let svc = Arc::new(service());
        let alice = svc.add_user_to_session("edit", "alice").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let svc = svc.clone();
            tasks.push(tokio::spawn(async move {
                svc.update_session_content("edit", &format!("v{i}")).await.unwrap();
            }));
        }
        let joiner = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.add_user_to_session("edit", "bob").await.unwrap() })
        };
        for task in tasks {
            task.await.unwrap();
        }
        let bob = joiner.await.unwrap();

        let session = svc.get_session("edit").await.unwrap().unwrap();
        assert!(session.users.contains_key(&alice.id));
        assert!(session.users.contains_key(&bob.id));
        assert!(session.content.starts_with('v'));
    }

    #[tokio::test]
    async fn removing_an_absent_user_is_a_noop() {
        let svc = service();
        svc.add_user_to_session("s", "alice").await.unwrap();
        let before = svc.get_session("s").await.unwrap().unwrap();

        assert!(svc.remove_user_from_session("s", "nobody").await.unwrap().is_none());
        assert!(svc.remove_user_from_session("missing", "nobody").await.unwrap().is_none());
        assert_eq!(svc.get_session("s").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn last_leave_shortens_ttl() {
        let svc = service();
        let alice = svc.add_user_to_session("s", "alice").await.unwrap();
        let bob = svc.add_user_to_session("s", "bob").await.unwrap();
        svc.add_user_to_session("other", "carol").await.unwrap();

        svc.remove_user_from_session("s", &alice.id).await.unwrap();
        let with_member = svc.session_ttl("s").await.unwrap().unwrap();
        assert!(with_member > svc.policy().empty_session_ttl);

        let removed = svc.remove_user_from_session("s", &bob.id).await.unwrap();
        assert_eq!(removed.map(|u| u.username), Some("bob".to_string()));

        let empty_ttl = svc.session_ttl("s").await.unwrap().unwrap();
        let active_ttl = svc.session_ttl("other").await.unwrap().unwrap();
        assert!(empty_ttl < active_ttl);
        assert!(empty_ttl <= Duration::from_secs(3600));

        // Rejoining restores the long TTL
        svc.add_user_to_session("s", "dave").await.unwrap();
        assert!(svc.session_ttl("s").await.unwrap().unwrap() > Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn updates_overwrite_and_refresh_activity() {
        let svc = service();
        svc.add_user_to_session("s", "alice").await.unwrap();
        let before = svc.get_session("s").await.unwrap().unwrap();

        svc.update_session_content("s", "print('hi')").await.unwrap();
        svc.update_session_language("s", Language::Python).await.unwrap();

        let after = svc.get_session("s").await.unwrap().unwrap();
        assert_eq!(after.content, "print('hi')");
        assert_eq!(after.language, Language::Python);
        assert!(after.last_active >= before.last_active);
    }

    #[tokio::test]
    async fn edits_refresh_the_acting_user() {
        let svc = service();
        let alice = svc.add_user_to_session("s", "alice").await.unwrap();
        let bob = svc.add_user_to_session("s", "bob").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut locked = svc.lock("s").await;
        let refreshed = locked.update_content(Some(&alice.id), "x").await.unwrap().unwrap();
        assert!(refreshed.last_active > alice.last_active);
        let refreshed = locked.update_language(Some(&alice.id), Language::Rust).await.unwrap().unwrap();
        assert!(refreshed.last_active > alice.last_active);
        assert!(locked.update_content(Some("stranger"), "y").await.unwrap().is_none());
        drop(locked);

        let stored = svc.get_session("s").await.unwrap().unwrap();
        assert_eq!(stored.users[&alice.id].last_active, refreshed.last_active);
        // Only the editor is refreshed
        assert_eq!(stored.users[&bob.id].last_active, bob.last_active);
    }

    #[tokio::test]
    async fn failed_writes_leave_no_partial_state() {
        let store = Arc::new(FlakyStore::default());
        let svc = SessionService::new(store.clone(), SessionPolicy::default());
        let alice = svc.add_user_to_session("s", "alice").await.unwrap();
        let before = svc.get_session("s").await.unwrap().unwrap();
        let ttl_before = svc.session_ttl("s").await.unwrap().unwrap();

        store.set_failing(true);
        let err = svc.add_user_to_session("s", "bob").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(err.to_payload().unwrap().kind, ErrorKind::ServiceUnavailable);
        assert!(svc.update_session_content("s", "lost").await.is_err());
        assert!(svc.remove_user_from_session("s", &alice.id).await.is_err());
        assert!(svc.get_or_create_session("new").await.is_err());

        assert_eq!(svc.get_session("s").await.unwrap().unwrap(), before);
        assert!(svc.get_session("new").await.unwrap().is_none());
        assert!(svc.session_ttl("s").await.unwrap().unwrap() <= ttl_before);

        // The same username can join once the store is back
        store.set_failing(false);
        let bob = svc.add_user_to_session("s", "bob").await.unwrap();
        assert_eq!(bob.username, "bob");
        assert_eq!(svc.get_session("s").await.unwrap().unwrap().users.len(), 2);
    }

    #[tokio::test]
    async fn updates_on_missing_sessions_fail() {
        let svc = service();
        let err = svc.update_session_content("ghost", "x").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(err.to_payload().is_none());
        assert!(svc.get_session("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_sessions() {
        let svc = service();
        svc.get_or_create_session("fresh").await.unwrap();
        svc.get_or_create_session("stale").await.unwrap();

        let mut stale = svc.get_session("stale").await.unwrap().unwrap();
        let old = Utc::now() - chrono::Duration::minutes(20);
        stale.created_at = old;
        stale.last_active = old;
        svc.store().put(&stale).await.unwrap();

        let deleted = svc.cleanup_inactive_sessions().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(svc.get_session("stale").await.unwrap().is_none());
        assert!(svc.get_session("fresh").await.unwrap().is_some());

        // Far enough in the future everything is stale
        let later = Utc::now() + chrono::Duration::minutes(16);
        assert_eq!(svc.cleanup_inactive_sessions_at(later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn locked_session_sees_its_own_writes() {
        let svc = service();
        let mut locked = svc.lock("s").await;
        let alice = locked.add_user("alice").await.unwrap();
        locked.update_content(Some(&alice.id), "hello").await.unwrap();
        let snapshot = locked.snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.content, "hello");
        assert!(snapshot.users.contains_key(&alice.id));
        assert!(locked.has_member(&alice.id).await.unwrap());
        assert!(!locked.has_member("someone-else").await.unwrap());
        assert_eq!(locked.session_id(), "s");
    }
}
