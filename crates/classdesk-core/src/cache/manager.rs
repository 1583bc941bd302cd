use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::SessionStore;

/// Consider cached reads stale after 5 minutes.
/// Rosters change during the day; anything older is refetched.
const CACHE_STALE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        match self.age_minutes() {
            // Negative ages come from clock skew
            m if m < 1 => "just now".to_string(),
            m if m < 60 => format!("{}m ago", m),
            m if m < 1440 => format!("{}h ago", m / 60),
            m => format!("{}d ago", m / 1440),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() >= CACHE_STALE_MINUTES
    }
}

/// What a cached read depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTag {
    Classes,
    Class(i64),
    Teachers,
    Students,
    Sessions(i64),
    Attendance(i64),
    Assignments(i64),
    CurrentUser,
}

struct Entry {
    value: CachedData<serde_json::Value>,
    tags: HashSet<CacheTag>,
    /// Signed-in identity the value was fetched for
    scope: u64,
}

/// Tag-invalidated cache of API reads, keyed by request path.
///
/// A cache scoped to a [`SessionStore`] stamps every entry with the
/// session's identity generation at the time the read was issued. Entries
/// from another identity are misses, so whoever signs in next never gets
/// the previous user's data, even from a read that was still in flight
/// when the session changed.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, Entry>>,
    session: Option<SessionStore>,
}

impl QueryCache {
    /// Cache shared by every identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose entries belong to the identity signed in to `store`
    pub fn scoped_to(store: &SessionStore) -> Self {
        Self {
            entries: RwLock::default(),
            session: Some(store.clone()),
        }
    }

    /// Current identity scope. Capture it before issuing a read and pass it
    /// to [`put_in_scope`](Self::put_in_scope).
    pub fn scope(&self) -> u64 {
        self.session
            .as_ref()
            .map(SessionStore::identity_generation)
            .unwrap_or(0)
    }

    /// Fresh cached value for `key`, if any
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let scope = self.scope();
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.scope != scope || entry.value.is_stale() {
            return None;
        }
        match serde_json::from_value(entry.value.data.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Age of the entry for `key`, for "updated 3m ago" labels
    pub async fn age_display(&self, key: &str) -> Option<String> {
        let scope = self.scope();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.scope == scope)
            .map(|entry| entry.value.age_display())
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T, tags: &[CacheTag]) {
        self.put_in_scope(self.scope(), key, value, tags).await;
    }

    /// Store a value read while `scope` was current. Dropped if the signed-in
    /// identity has changed since; returns whether it was stored.
    pub async fn put_in_scope<T: Serialize>(&self, scope: u64, key: &str, value: &T, tags: &[CacheTag]) -> bool {
        if scope != self.scope() {
            debug!(key, "Session changed during read, not caching");
            return false;
        }
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                debug!(key, error = %e, "Failed to serialize value for cache");
                return false;
            }
        };
        let entry = Entry {
            value: CachedData::new(data),
            tags: tags.iter().copied().collect(),
            scope,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        true
    }

    /// Drop every entry carrying `tag`. Returns how many were dropped.
    pub async fn invalidate(&self, tag: CacheTag) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.contains(&tag));
        let dropped = before - entries.len();
        debug!(?tag, dropped, "Cache invalidated");
        dropped
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Free the entries of an identity once it signs out or another user
    /// signs in. Lookups already ignore them; this only releases memory.
    pub fn clear_on_identity_change(self: &Arc<Self>, store: &SessionStore) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut rx = store.subscribe();
        let mut identity = rx.borrow_and_update().identity_generation;
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().identity_generation;
                if current != identity {
                    identity = current;
                    debug!(identity, "Signed-in identity changed, clearing query cache");
                    cache.clear().await;
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
