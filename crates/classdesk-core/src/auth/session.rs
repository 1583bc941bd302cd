use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::repository::{SessionRepository, StorageError};
use super::AuthError;
use crate::models::UserProfile;

/// How long hydration waits for the repository before continuing signed out.
/// Keychains can stall on first unlock; 2s keeps startup responsive.
pub const DEFAULT_HYDRATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// The authentication session: token pair plus identity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn authenticated(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: Option<UserProfile>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            user,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Point-in-time view of the store, as published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub is_hydrated: bool,
    /// Bumped by every replacement of the session
    pub generation: u64,
    /// Bumped when the signed-in identity changes (sign-in with a user,
    /// sign-out, a session loaded from storage), but not by token refreshes
    pub identity_generation: u64,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }
}

/// Single source of truth for the authentication session.
///
/// Constructed explicitly at process start and handed to whatever needs it;
/// clones share the same state. Session fields only change as a whole
/// through [`set_auth`](Self::set_auth) and [`clear_auth`](Self::clear_auth),
/// and every change is written through the [`SessionRepository`].
///
/// Lifecycle: `new` → `hydrate` → use → `dispose`.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<SessionSnapshot>,
    repository: Arc<dyn SessionRepository>,
    // Held across mutate-then-persist so the stored record follows mutation order
    write_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                state,
                repository,
                write_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Replace the token pair, and the user if one is given.
    ///
    /// `user: None` keeps the current identity so a token-only refresh does
    /// not erase it. Persistence failures are logged, never returned.
    pub async fn set_auth(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: Option<UserProfile>,
    ) -> Result<(), AuthError> {
        self.replace_tokens(None, access_token.into(), refresh_token.into(), user)
            .await
            .map(|_| ())
    }

    /// Install refreshed tokens, keeping the user, but only if the session is
    /// still at `expected_generation`.
    ///
    /// Returns `Ok(false)` without touching the session when it was replaced
    /// or cleared in the meantime, so a sign-out during a refresh stays
    /// signed out.
    pub async fn set_tokens_if_current(
        &self,
        expected_generation: u64,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<bool, AuthError> {
        self.replace_tokens(Some(expected_generation), access_token.into(), refresh_token.into(), None)
            .await
    }

    async fn replace_tokens(
        &self,
        expected_generation: Option<u64>,
        access_token: String,
        refresh_token: String,
        user: Option<UserProfile>,
    ) -> Result<bool, AuthError> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let _guard = self.inner.write_lock.lock().await;
        let replaces_user = user.is_some();
        let mut updated = Session::default();
        let mut generation = 0;
        let applied = self.inner.state.send_if_modified(|state| {
            if expected_generation.is_some_and(|expected| expected != state.generation) {
                generation = state.generation;
                return false;
            }
            state.session.access_token = Some(access_token);
            state.session.refresh_token = Some(refresh_token);
            if user.is_some() {
                state.session.user = user;
                state.identity_generation += 1;
            }
            state.generation += 1;
            updated = state.session.clone();
            generation = state.generation;
            true
        });
        if !applied {
            debug!(?expected_generation, generation, "Session changed meanwhile, tokens discarded");
            return Ok(false);
        }
        debug!(generation, replaces_user, "Session tokens replaced");

        self.persist(Some(&updated)).await;
        Ok(true)
    }

    /// Sign out locally: drop both tokens and the user, and wipe the
    /// persisted record.
    pub async fn clear_auth(&self) {
        let _guard = self.inner.write_lock.lock().await;
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            state.session = Session::default();
            state.generation += 1;
            state.identity_generation += 1;
            generation = state.generation;
        });
        info!(generation, "Session cleared");

        self.persist(None).await;
    }

    /// Mark hydration complete. Only the first call has any effect.
    pub fn set_hydrated(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.is_hydrated {
                false
            } else {
                state.is_hydrated = true;
                true
            }
        });
        if changed {
            debug!(authenticated = self.is_authenticated(), "Session hydrated");
        }
    }

    async fn persist(&self, session: Option<&Session>) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            debug!("Session store disposed, skipping persistence");
            return;
        }
        let result = match session {
            Some(session) => self.inner.repository.save(session).await,
            None => self.inner.repository.clear().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    /// Load the persisted session, waiting at most `timeout`.
    ///
    /// Storage errors count as "no prior session". On timeout the store is
    /// marked hydrated with whatever is in memory (normally signed out) and
    /// the load keeps running; if it later produces a session and nothing
    /// has touched the store since, that session is installed.
    pub async fn hydrate(&self, timeout: Duration) {
        if self.is_hydrated() {
            debug!("Session already hydrated");
            return;
        }

        let repository = Arc::clone(&self.inner.repository);
        let mut load = tokio::spawn(async move { repository.load().await });

        match tokio::time::timeout(timeout, &mut load).await {
            Ok(result) => {
                if let Some(session) = Self::loaded_session(result) {
                    self.install_loaded(session);
                }
                self.set_hydrated();
            }
            Err(_) => {
                warn!(?timeout, "Session hydration timed out, continuing signed out");
                self.set_hydrated();

                let store = self.clone();
                tokio::spawn(async move {
                    if let Some(session) = Self::loaded_session(load.await) {
                        if store.install_loaded(session) {
                            info!("Persisted session arrived after hydration timeout");
                        }
                    }
                });
            }
        }
    }

    fn loaded_session(result: Result<Result<Option<Session>, StorageError>, JoinError>) -> Option<Session> {
        match result {
            Ok(Ok(session)) => {
                debug!(found = session.is_some(), "Persisted session loaded");
                session
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to load persisted session, starting signed out");
                None
            }
            Err(e) => {
                warn!(error = %e, "Session load task failed, starting signed out");
                None
            }
        }
    }

    /// Install a session read from storage unless the store was already
    /// mutated (a login or sign-out wins over a stale record).
    fn install_loaded(&self, session: Session) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.generation != 0 {
                return false;
            }
            state.session = session;
            state.generation += 1;
            state.identity_generation += 1;
            true
        })
    }

    /// Resolves once hydration has completed (or timed out).
    pub async fn wait_hydrated(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.is_hydrated).await;
    }

    /// Watch session changes, e.g. to route to the login screen when
    /// `is_authenticated` turns false.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Finish any in-flight write and stop persisting further changes.
    pub async fn dispose(self) {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.disposed.store(true, Ordering::SeqCst);
        info!(authenticated = self.is_authenticated(), "Session store disposed");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.borrow().session.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.borrow().session.refresh_token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().session.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.state.borrow().is_hydrated
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    pub fn identity_generation(&self) -> u64 {
        self.inner.state.borrow().identity_generation
    }

    /// Access token together with the generation it belongs to
    pub(crate) fn bearer(&self) -> (Option<String>, u64) {
        let state = self.inner.state.borrow();
        (state.session.access_token.clone(), state.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repository::MemorySessionRepository;
    use async_trait::async_trait;

    /// Repository whose load takes `delay`, or never finishes when `None`
    struct SlowRepository {
        delay: Option<Duration>,
        session: Option<Session>,
    }

    #[async_trait]
    impl SessionRepository for SlowRepository {
        async fn load(&self) -> Result<Option<Session>, StorageError> {
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            Ok(self.session.clone())
        }

        async fn save(&self, _session: &Session) -> Result<(), StorageError> {
            Ok(())
        }

        async fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl SessionRepository for BrokenRepository {
        async fn load(&self) -> Result<Option<Session>, StorageError> {
            Err(StorageError::Crypto("disk unreadable".to_string()))
        }

        async fn save(&self, _session: &Session) -> Result<(), StorageError> {
            Err(StorageError::Crypto("disk unwritable".to_string()))
        }

        async fn clear(&self) -> Result<(), StorageError> {
            Err(StorageError::Crypto("disk unwritable".to_string()))
        }
    }

    fn memory_store() -> (SessionStore, Arc<MemorySessionRepository>) {
        let repo = Arc::new(MemorySessionRepository::new());
        (SessionStore::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let (store, _) = memory_store();
        assert!(!store.is_authenticated());
        assert!(!store.is_hydrated());
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.user().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_set_auth_then_clear_auth() {
        let (store, repo) = memory_store();

        store
            .set_auth("tokA", "refA", Some(UserProfile::named("Jo")))
            .await
            .expect("set_auth failed");
        assert!(store.is_authenticated());
        assert_eq!(store.user().and_then(|u| u.name).as_deref(), Some("Jo"));
        assert!(repo.record().await.is_some());

        store.clear_auth().await;
        assert!(!store.is_authenticated());
        assert!(store.user().is_none());
        assert!(store.refresh_token().is_none());
        // Durable storage is cleared too, not left stale
        assert!(repo.record().await.is_none());
    }

    #[tokio::test]
    async fn test_set_auth_without_user_keeps_identity() {
        let (store, repo) = memory_store();
        store
            .set_auth("tokA", "refA", Some(UserProfile::named("Jo")))
            .await
            .expect("set_auth failed");

        store.set_auth("tokB", "refB", None).await.expect("set_auth failed");

        assert_eq!(store.access_token().as_deref(), Some("tokB"));
        assert_eq!(store.refresh_token().as_deref(), Some("refB"));
        assert_eq!(store.user(), Some(UserProfile::named("Jo")));

        let persisted = repo.load().await.expect("load failed").expect("nothing persisted");
        assert_eq!(persisted.access_token.as_deref(), Some("tokB"));
        assert_eq!(persisted.user, Some(UserProfile::named("Jo")));
    }

    #[tokio::test]
    async fn test_set_auth_rejects_empty_tokens() {
        let (store, _) = memory_store();
        assert!(matches!(store.set_auth("", "refA", None).await, Err(AuthError::EmptyToken)));
        assert!(matches!(store.set_auth("tokA", "", None).await, Err(AuthError::EmptyToken)));
        assert!(!store.is_authenticated());
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_mutation() {
        let store = SessionStore::new(Arc::new(BrokenRepository));
        store.set_auth("tokA", "refA", None).await.expect("set_auth should succeed in memory");
        assert!(store.is_authenticated());
        store.clear_auth().await;
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_generation_counts_replacements() {
        let (store, _) = memory_store();
        store.set_auth("a", "r", None).await.expect("set_auth failed");
        store.set_auth("b", "r", None).await.expect("set_auth failed");
        store.clear_auth().await;
        assert_eq!(store.generation(), 3);
    }

    #[tokio::test]
    async fn test_identity_generation_ignores_token_refresh() {
        let (store, _) = memory_store();
        store
            .set_auth("a", "r", Some(UserProfile::named("Jo")))
            .await
            .expect("set_auth failed");
        assert_eq!(store.identity_generation(), 1);

        store.set_auth("b", "r", None).await.expect("set_auth failed");
        assert_eq!(store.identity_generation(), 1);

        store
            .set_auth("c", "r", Some(UserProfile::named("Sam")))
            .await
            .expect("set_auth failed");
        store.clear_auth().await;
        assert_eq!(store.identity_generation(), 3);
    }

    #[tokio::test]
    async fn test_set_tokens_if_current() {
        let (store, repo) = memory_store();
        store
            .set_auth("tokA", "refA", Some(UserProfile::named("Jo")))
            .await
            .expect("set_auth failed");
        let seen = store.generation();

        let applied = store
            .set_tokens_if_current(seen, "tokB", "refB")
            .await
            .expect("set_tokens_if_current failed");
        assert!(applied);
        assert_eq!(store.access_token().as_deref(), Some("tokB"));
        assert_eq!(store.user(), Some(UserProfile::named("Jo")));

        // Stale generation: a sign-out happened after `seen` was read
        store.clear_auth().await;
        let applied = store
            .set_tokens_if_current(seen + 1, "tokC", "refC")
            .await
            .expect("set_tokens_if_current failed");
        assert!(!applied);
        assert!(!store.is_authenticated());
        assert!(repo.load().await.expect("load failed").is_none());
    }

    #[tokio::test]
    async fn test_hydrate_loads_persisted_session() {
        let persisted = Session::authenticated("tokA", "refA", Some(UserProfile::named("Jo")));
        let repo = MemorySessionRepository::with_session(&persisted).expect("encode failed");
        let store = SessionStore::new(Arc::new(repo));

        store.hydrate(DEFAULT_HYDRATION_TIMEOUT).await;

        assert!(store.is_hydrated());
        assert!(store.is_authenticated());
        assert_eq!(store.snapshot().session, persisted);
    }

    #[tokio::test]
    async fn test_hydrate_storage_error_means_signed_out() {
        let store = SessionStore::new(Arc::new(BrokenRepository));
        store.hydrate(DEFAULT_HYDRATION_TIMEOUT).await;
        assert!(store.is_hydrated());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_hydrate_times_out_instead_of_hanging() {
        let store = SessionStore::new(Arc::new(SlowRepository {
            delay: None,
            session: Some(Session::authenticated("tokA", "refA", None)),
        }));

        let started = std::time::Instant::now();
        store.hydrate(Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(store.is_hydrated());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_late_load_installs_after_timeout() {
        let store = SessionStore::new(Arc::new(SlowRepository {
            delay: Some(Duration::from_millis(100)),
            session: Some(Session::authenticated("tokA", "refA", None)),
        }));
        let mut rx = store.subscribe();

        store.hydrate(Duration::from_millis(10)).await;
        assert!(store.is_hydrated());
        assert!(!store.is_authenticated());

        // Signed-out first, then the late authenticated transition
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.is_authenticated()))
            .await
            .expect("late session never arrived")
            .expect("store dropped");
        assert_eq!(store.access_token().as_deref(), Some("tokA"));
    }

    #[tokio::test]
    async fn test_late_load_does_not_override_login() {
        let store = SessionStore::new(Arc::new(SlowRepository {
            delay: Some(Duration::from_millis(50)),
            session: Some(Session::authenticated("stale", "stale-ref", None)),
        }));

        store.hydrate(Duration::from_millis(5)).await;
        store.set_auth("fresh", "fresh-ref", None).await.expect("set_auth failed");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_wait_hydrated_and_subscribe() {
        let (store, _) = memory_store();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_hydrated().await })
        };

        store.hydrate(DEFAULT_HYDRATION_TIMEOUT).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_hydrated did not resolve")
            .expect("waiter panicked");

        let mut rx = store.subscribe();
        store.set_auth("tokA", "refA", None).await.expect("set_auth failed");
        assert!(rx.has_changed().expect("sender dropped"));
        assert!(rx.borrow_and_update().is_authenticated());

        store.clear_auth().await;
        assert!(!rx.borrow_and_update().is_authenticated());
    }

    #[tokio::test]
    async fn test_set_hydrated_is_idempotent() {
        let (store, _) = memory_store();
        let mut rx = store.subscribe();
        store.set_hydrated();
        assert!(rx.has_changed().expect("sender dropped"));
        rx.borrow_and_update();
        store.set_hydrated();
        assert!(!rx.has_changed().expect("sender dropped"));
    }

    #[tokio::test]
    async fn test_dispose_stops_persistence() {
        let (store, repo) = memory_store();
        let handle = store.clone();
        store.dispose().await;

        handle.set_auth("tokA", "refA", None).await.expect("set_auth failed");
        assert!(handle.is_authenticated());
        assert!(repo.record().await.is_none());
    }
}
