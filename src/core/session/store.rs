//! In-memory session storage with TTL expiration and LRU eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{Session, SessionConfig};

/// A stored session behind its exclusion lock.
///
/// At most one driver advances a session at a time; everyone else waits on
/// the lock. The lock is not re-entrant: code holding it must not call back
/// into the store for the same session.
pub struct SessionSlot {
    session: tokio::sync::Mutex<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: tokio::sync::Mutex::new(session),
        }
    }

    /// Acquire exclusive access to the session.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }
}

struct Entry {
    slot: Arc<SessionSlot>,
    last_activity: Instant,
}

/// Thread-safe in-memory session store.
///
/// Expired sessions are evicted lazily on access; when the store is at
/// capacity, the least-recently-used session is dropped to make room.
pub struct SessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    max_sessions: usize,
    ttl: Duration,
    defaults: SessionConfig,
}

impl SessionStore {
    /// Create a store with the given capacity, TTL, and config template
    /// for new sessions.
    pub fn new(max_sessions: usize, ttl: Duration, defaults: SessionConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_sessions,
            ttl,
            defaults,
        }
    }

    fn evict_expired(entries: &mut HashMap<String, Entry>, ttl: Duration) {
        let now = Instant::now();
        entries.retain(|id, entry| {
            let keep = now.duration_since(entry.last_activity) <= ttl;
            if !keep {
                tracing::debug!(session_id = %id, "evicting expired session");
            }
            keep
        });
    }

    fn evict_lru(entries: &mut HashMap<String, Entry>, max_sessions: usize) {
        if entries.len() >= max_sessions {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_activity)
                .map(|(id, _)| id.clone())
            {
                tracing::debug!(session_id = %oldest, "evicting least-recently-used session");
                entries.remove(&oldest);
            }
        }
    }

    /// Return the session with the given id, or create a fresh one.
    ///
    /// A `None` or unknown id creates a new session (reusing the requested
    /// id when one was supplied, so reconnecting clients keep their id).
    pub fn get_or_create(&self, id: Option<&str>) -> (String, Arc<SessionSlot>) {
        let mut entries = self.entries.write();
        Self::evict_expired(&mut entries, self.ttl);

        if let Some(id) = id {
            if let Some(entry) = entries.get_mut(id) {
                entry.last_activity = Instant::now();
                return (id.to_string(), Arc::clone(&entry.slot));
            }
        }

        Self::evict_lru(&mut entries, self.max_sessions);

        let id = id.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        let slot = Arc::new(SessionSlot::new(Session::new(
            id.clone(),
            self.defaults.clone(),
        )));
        entries.insert(
            id.clone(),
            Entry {
                slot: Arc::clone(&slot),
                last_activity: Instant::now(),
            },
        );
        tracing::info!(session_id = %id, "created session");
        (id, slot)
    }

    /// Get an existing session, touching its LRU timestamp.
    pub fn get(&self, id: &str) -> Option<Arc<SessionSlot>> {
        let mut entries = self.entries.write();
        Self::evict_expired(&mut entries, self.ttl);
        entries.get_mut(id).map(|entry| {
            entry.last_activity = Instant::now();
            Arc::clone(&entry.slot)
        })
    }

    /// Clear a session's history and iteration count, keeping id and config.
    ///
    /// Returns false if the session does not exist.
    pub async fn reset(&self, id: &str) -> bool {
        let Some(slot) = self.get(id) else {
            return false;
        };
        slot.lock().await.reset();
        tracing::info!(session_id = %id, "reset session");
        true
    }

    /// Delete a session. Returns false if it did not exist.
    pub fn delete(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// List ids of all live (non-expired) sessions.
    pub fn list(&self) -> Vec<String> {
        let mut entries = self.entries.write();
        Self::evict_expired(&mut entries, self.ttl);
        entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max: usize, ttl: Duration) -> SessionStore {
        SessionStore::new(max, ttl, SessionConfig::default())
    }

    #[tokio::test]
    async fn creates_session_with_generated_id() {
        let store = store(10, Duration::from_secs(60));
        let (id, slot) = store.get_or_create(None);
        assert!(!id.is_empty());
        assert_eq!(slot.lock().await.id, id);
    }

    #[tokio::test]
    async fn returns_existing_session_by_id() {
        let store = store(10, Duration::from_secs(60));
        let (id, slot) = store.get_or_create(None);
        slot.lock().await.push_user("hello");

        let (again, slot) = store.get_or_create(Some(&id));
        assert_eq!(again, id);
        assert_eq!(slot.lock().await.messages().len(), 1);
    }

    #[test]
    fn reuses_requested_id_for_unknown_session() {
        let store = store(10, Duration::from_secs(60));
        let (id, _) = store.get_or_create(Some("client-chosen"));
        assert_eq!(id, "client-chosen");
        assert!(store.get("client-chosen").is_some());
    }

    #[tokio::test]
    async fn reset_clears_history_and_keeps_id() {
        let store = store(10, Duration::from_secs(60));
        let (id, slot) = store.get_or_create(None);
        slot.lock().await.push_user("hello");

        assert!(store.reset(&id).await);
        let session = slot.lock().await;
        assert_eq!(session.id, id);
        assert!(session.messages().is_empty());
        assert_eq!(session.iteration_count(), 0);
    }

    #[tokio::test]
    async fn reset_unknown_session_returns_false() {
        let store = store(10, Duration::from_secs(60));
        assert!(!store.reset("nope").await);
    }

    #[test]
    fn delete_removes_session() {
        let store = store(10, Duration::from_secs(60));
        let (id, _) = store.get_or_create(None);
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn expired_sessions_are_evicted() {
        let store = store(10, Duration::from_nanos(1));
        let (id, _) = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(1));
        assert!(store.get(&id).is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let store = store(2, Duration::from_secs(60));
        let (first, _) = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(2));
        let (second, _) = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(2));

        // Touch the first so the second becomes least recently used.
        store.get(&first);
        let (third, _) = store.get_or_create(None);

        let ids = store.list();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&third));
        assert!(!ids.contains(&second));
    }

    #[tokio::test]
    async fn lock_serializes_access() {
        let store = store(10, Duration::from_secs(60));
        let (_, slot) = store.get_or_create(None);

        let guard = slot.lock().await;
        assert!(slot.session.try_lock().is_err());
        drop(guard);
        assert!(slot.session.try_lock().is_ok());
    }
}
