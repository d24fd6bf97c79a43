//! HRANA session management (spec.md §3 "HRANA Session", §5
//! "Shared-resource policy"). A session lives behind an opaque baton and is
//! swept after 30s of inactivity by a periodic sweeper, grounded on the
//! worker pool's `BackgroundWorker`-driven cleanup timers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::agents::background_worker::BackgroundWorker;

/// Server-side state behind a baton.
pub struct Session {
    pub created_at: Instant,
    last_touched: RwLock<Instant>,
    pub in_transaction: RwLock<bool>,
    pub stored_sql: RwLock<HashMap<i64, String>>,
    pub adapter_type: Option<String>,
    pub namespace: Option<String>,
}

impl Session {
    fn new(adapter_type: Option<String>, namespace: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_touched: RwLock::new(now),
            in_transaction: RwLock::new(false),
            stored_sql: RwLock::new(HashMap::new()),
            adapter_type,
            namespace,
        }
    }

    fn touch(&self) {
        *self.last_touched.write().expect("session lock poisoned") = Instant::now();
    }

    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_touched.read().expect("session lock poisoned").elapsed() >= idle_timeout
    }
}

/// Owns the baton -> session map; updated under a single-writer discipline
/// as required by §5, with a periodic sweeper evicting expired entries.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Session>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Allocate a new session and return its baton.
    pub fn create(&self, adapter_type: Option<String>, namespace: Option<String>) -> Uuid {
        let baton = Uuid::new_v4();
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .insert(baton, Session::new(adapter_type, namespace));
        baton
    }

    /// Look up a live session by baton, touching its last-activity clock.
    /// Returns `None` for an unknown or expired baton (the caller maps that
    /// to `INVALID_BATON`).
    pub fn touch_and_check(&self, baton: Uuid) -> bool {
        let sessions = self.sessions.read().expect("session map lock poisoned");
        match sessions.get(&baton) {
            Some(session) if !session.is_expired(self.idle_timeout) => {
                session.touch();
                true
            }
            _ => false,
        }
    }

    pub fn with_session<R>(&self, baton: Uuid, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let sessions = self.sessions.read().expect("session map lock poisoned");
        let session = sessions.get(&baton)?;
        if session.is_expired(self.idle_timeout) {
            return None;
        }
        session.touch();
        Some(f(session))
    }

    /// `close` — deletes the session unconditionally; idempotent.
    pub fn close(&self, baton: Uuid) {
        self.sessions.write().expect("session map lock poisoned").remove(&baton);
    }

    /// Evict every session idle for longer than the configured timeout.
    pub fn sweep_expired(&self) {
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        sessions.retain(|_, session| !session.is_expired(self.idle_timeout));
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().expect("session map lock poisoned").len()
    }

    /// Spawn the periodic sweeper as a `BackgroundWorker` task (§3 "a
    /// background sweeper (60 s period) evicts expired sessions").
    pub fn spawn_sweeper(self: std::sync::Arc<Self>, background: &BackgroundWorker, period: Duration) {
        let manager = self;
        let background = background.clone();
        tokio::spawn(async move {
            background
                .submit("hrana-session-sweeper", move || {
                    let manager = manager.clone();
                    async move {
                        loop {
                            tokio::time::sleep(period).await;
                            manager.sweep_expired();
                        }
                    }
                })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_touch_and_check_succeeds() {
        let manager = SessionManager::new(Duration::from_secs(30));
        let baton = manager.create(None, None);
        assert!(manager.touch_and_check(baton));
    }

    #[test]
    fn unknown_baton_fails_check() {
        let manager = SessionManager::new(Duration::from_secs(30));
        assert!(!manager.touch_and_check(Uuid::new_v4()));
    }

    #[test]
    fn expired_session_fails_check() {
        let manager = SessionManager::new(Duration::from_millis(1));
        let baton = manager.create(None, None);
        std::thread::sleep(Duration::from_millis(10));
        assert!(!manager.touch_and_check(baton));
    }

    #[test]
    fn close_removes_the_session() {
        let manager = SessionManager::new(Duration::from_secs(30));
        let baton = manager.create(None, None);
        manager.close(baton);
        assert!(!manager.touch_and_check(baton));
    }

    #[test]
    fn sweep_expired_drops_only_idle_sessions() {
        let manager = SessionManager::new(Duration::from_millis(1));
        let baton = manager.create(None, None);
        std::thread::sleep(Duration::from_millis(10));
        manager.sweep_expired();
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.touch_and_check(baton));
    }

    #[test]
    fn stored_sql_round_trips_through_with_session() {
        let manager = SessionManager::new(Duration::from_secs(30));
        let baton = manager.create(None, None);
        manager.with_session(baton, |session| {
            session
                .stored_sql
                .write()
                .expect("session lock poisoned")
                .insert(1, "SELECT 1".to_string());
        });
        let sql = manager
            .with_session(baton, |session| {
                session.stored_sql.read().expect("session lock poisoned").get(&1).cloned()
            })
            .flatten();
        assert_eq!(sql, Some("SELECT 1".to_string()));
    }
}
