use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::calendar::CalendarSnapshot;
use crate::limits::*;
use crate::model::RoomId;
use crate::observability;

/// Session-scoped key/value cache holding "last shown" calendar snapshots.
pub trait SnapshotCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CalendarSnapshot>;
    fn put(&self, key: &str, snapshot: CalendarSnapshot);
    fn remove(&self, key: &str);
}

/// Cache key for a room's block map.
pub fn block_map_key(room_id: RoomId) -> String {
    format!("block_map_{room_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("empty session id")]
    EmptyId,
    #[error("session id too long")]
    IdTooLong,
    #[error("too many sessions")]
    TooMany,
}

/// One admin session's snapshots.
pub struct Session {
    id: String,
    snapshots: DashMap<String, CalendarSnapshot>,
    opened: Instant,
    /// Milliseconds after `opened` of the last access.
    last_seen_ms: AtomicU64,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            snapshots: DashMap::new(),
            opened: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        let elapsed = self.opened.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl SnapshotCache for Session {
    fn get(&self, key: &str) -> Option<CalendarSnapshot> {
        self.touch();
        self.snapshots.get(key).map(|e| e.value().clone())
    }

    fn put(&self, key: &str, snapshot: CalendarSnapshot) {
        self.touch();
        self.snapshots.insert(key.to_string(), snapshot);
    }

    fn remove(&self, key: &str) {
        self.touch();
        self.snapshots.remove(key);
    }
}

/// Live sessions by id. Sessions idle longer than `lifetime` are swept.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    lifetime: Duration,
}

impl SessionManager {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    /// Get or lazily open the session for `id`.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.sessions.get(id) {
            session.touch();
            return Ok(session.value().clone());
        }
        if id.is_empty() {
            return Err(SessionError::EmptyId);
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::IdTooLong);
        }
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::TooMany);
        }
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id)))
            .value()
            .clone();
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    /// Drop a session, e.g. on logout.
    pub fn end(&self, id: &str) {
        self.sessions.remove(id);
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than the lifetime as of `now`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.saturating_duration_since(session.last_seen()) <= self.lifetime);
        let swept = before.saturating_sub(self.sessions.len());
        if swept > 0 {
            debug!("swept {swept} expired sessions");
            metrics::counter!(observability::SESSIONS_EXPIRED_TOTAL).increment(swept as u64);
            metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DayMap;
    use crate::model::CalendarMonth;
    use ulid::Ulid;

    fn snapshot(room_id: RoomId) -> CalendarSnapshot {
        let month = CalendarMonth::new(2024, 6).unwrap();
        CalendarSnapshot {
            room_id,
            month,
            version: Ulid::new(),
            blocks: DayMap::empty(month),
        }
    }

    #[test]
    fn put_overwrites_previous_snapshot() {
        let session = Session::new("s1");
        let first = snapshot(1);
        let second = snapshot(1);
        session.put(&block_map_key(1), first);
        session.put(&block_map_key(1), second.clone());
        assert_eq!(session.get(&block_map_key(1)), Some(second));
        assert_eq!(session.len(), 1);

        session.remove(&block_map_key(1));
        assert!(session.get(&block_map_key(1)).is_none());
    }

    #[test]
    fn keys_are_per_room() {
        let session = Session::new("s1");
        session.put(&block_map_key(1), snapshot(1));
        assert!(session.get(&block_map_key(2)).is_none());
        assert_eq!(block_map_key(12), "block_map_12");
    }

    #[test]
    fn sessions_isolated() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let a = manager.get_or_create("a").unwrap();
        let b = manager.get_or_create("b").unwrap();
        a.put(&block_map_key(1), snapshot(1));
        assert!(b.get(&block_map_key(1)).is_none());
        assert!(Arc::ptr_eq(&a, &manager.get_or_create("a").unwrap()));
    }

    #[test]
    fn bad_ids_rejected() {
        let manager = SessionManager::new(Duration::from_secs(60));
        assert_eq!(manager.get_or_create("").err(), Some(SessionError::EmptyId));
        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert_eq!(manager.get_or_create(&long).err(), Some(SessionError::IdTooLong));
        assert!(manager.is_empty());
    }

    #[test]
    fn idle_sessions_swept() {
        let manager = SessionManager::new(Duration::from_secs(60));
        manager.get_or_create("a").unwrap();
        assert_eq!(manager.sweep_expired(Instant::now()), 0);
        assert_eq!(manager.sweep_expired(Instant::now() + Duration::from_secs(61)), 1);
        assert!(manager.get("a").is_none());
    }

    #[test]
    fn end_drops_session() {
        let manager = SessionManager::new(Duration::from_secs(60));
        manager.get_or_create("a").unwrap();
        manager.end("a");
        assert_eq!(manager.len(), 0);
    }
}
