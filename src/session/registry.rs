//! In-memory table of device-bound sessions.
//!
//! Signed tokens are stateless; this registry is what makes them revocable.
//! At most one session exists per device id. Revocation is never pushed to
//! holders: they find out on their next verification.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A live login on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub device_id: String,
    /// `jti` of the token currently bound to this device.
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SessionRegistry {
    /// device_id -> session
    sessions: Mutex<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Upsert by device id. Returns the session this one superseded.
    pub fn register(&self, session: Session) -> Option<Session> {
        let previous = self
            .sessions
            .lock()
            .insert(session.device_id.clone(), session);
        previous.filter(|old| old.expires_at > self.clock.now())
    }

    /// Live session for a device. Expired entries read as absent.
    pub fn get(&self, device_id: &str) -> Option<Session> {
        let now = self.clock.now();
        self.sessions
            .lock()
            .get(device_id)
            .filter(|session| session.expires_at > now)
            .cloned()
    }

    /// True when `device_id` has a live session bound to `token_id`.
    pub fn is_live(&self, device_id: &str, token_id: &str) -> bool {
        let now = self.clock.now();
        self.sessions
            .lock()
            .get(device_id)
            .is_some_and(|session| session.token_id == token_id && session.expires_at > now)
    }

    pub fn touch(&self, device_id: &str) -> bool {
        let now = self.clock.now();
        match self.sessions.lock().get_mut(device_id) {
            Some(session) if session.expires_at > now => {
                session.last_activity_at = now;
                true
            }
            _ => false,
        }
    }

    /// Bind a refreshed token to the device's session.
    pub fn rebind(&self, device_id: &str, token_id: &str, expires_at: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        match self.sessions.lock().get_mut(device_id) {
            Some(session) => {
                session.token_id = token_id.to_owned();
                session.expires_at = expires_at;
                session.last_activity_at = now;
                true
            }
            None => false,
        }
    }

    pub fn revoke(&self, device_id: &str) -> Option<Session> {
        self.sessions.lock().remove(device_id)
    }

    /// Remove the device's session only if it is still bound to `token_id`.
    pub fn revoke_token(&self, device_id: &str, token_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(device_id)
            .is_some_and(|session| session.token_id == token_id)
        {
            sessions.remove(device_id);
            return true;
        }
        false
    }

    pub fn revoke_all_for_user(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.user_id != user_id);
        before - sessions.len()
    }

    /// Live sessions for a user, most recently active first.
    pub fn active_for_user(&self, user_id: &str) -> Vec<Session> {
        let now = self.clock.now();
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .filter(|session| session.user_id == user_id && session.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    /// Remove sessions past their expiry. Call periodically.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn registry() -> (Arc<ManualClock>, SessionRegistry) {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = SessionRegistry::new(clock.clone());
        (clock, registry)
    }

    fn session(clock: &ManualClock, user: &str, device: &str, token: &str) -> Session {
        let now = clock.now();
        Session {
            user_id: user.into(),
            device_id: device.into(),
            token_id: token.into(),
            issued_at: now,
            expires_at: now + Duration::hours(2),
            last_activity_at: now,
            ip_address: Some("127.0.0.1".into()),
            user_agent: None,
        }
    }

    #[test]
    fn register_supersedes_same_device() {
        let (clock, registry) = registry();
        assert!(registry
            .register(session(&clock, "u1", "dev_1", "t1"))
            .is_none());
        let previous = registry
            .register(session(&clock, "u1", "dev_1", "t2"))
            .unwrap();
        assert_eq!(previous.token_id, "t1");
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_live("dev_1", "t1"));
        assert!(registry.is_live("dev_1", "t2"));
    }

    #[test]
    fn expired_sessions_read_as_absent() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        clock.advance(Duration::hours(2));
        assert!(registry.get("dev_1").is_none());
        assert!(!registry.is_live("dev_1", "t1"));
        assert!(!registry.touch("dev_1"));
    }

    #[test]
    fn touch_updates_activity() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        clock.advance(Duration::minutes(5));
        assert!(registry.touch("dev_1"));
        assert_eq!(registry.get("dev_1").unwrap().last_activity_at, clock.now());
    }

    #[test]
    fn rebind_moves_token_and_expiry() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        let new_expiry = clock.now() + Duration::hours(3);
        assert!(registry.rebind("dev_1", "t2", new_expiry));
        let current = registry.get("dev_1").unwrap();
        assert_eq!(current.token_id, "t2");
        assert_eq!(current.expires_at, new_expiry);
        assert!(!registry.rebind("dev_2", "t3", new_expiry));
    }

    #[test]
    fn revoke_variants() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        registry.register(session(&clock, "u1", "dev_2", "t2"));
        registry.register(session(&clock, "u2", "dev_3", "t3"));

        assert!(!registry.revoke_token("dev_3", "stale"));
        assert!(registry.revoke_token("dev_3", "t3"));
        assert!(registry.revoke("dev_1").is_some());
        assert!(registry.revoke("dev_1").is_none());
        assert_eq!(registry.revoke_all_for_user("u1"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn active_for_user_filters_and_sorts() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        clock.advance(Duration::minutes(1));
        registry.register(session(&clock, "u1", "dev_2", "t2"));
        registry.register(session(&clock, "u2", "dev_3", "t3"));

        let devices: Vec<_> = registry
            .active_for_user("u1")
            .into_iter()
            .map(|s| s.device_id)
            .collect();
        assert_eq!(devices, vec!["dev_2", "dev_1"]);
    }

    #[test]
    fn sweep_removes_expired() {
        let (clock, registry) = registry();
        registry.register(session(&clock, "u1", "dev_1", "t1"));
        clock.advance(Duration::hours(1));
        registry.register(session(&clock, "u1", "dev_2", "t2"));
        clock.advance(Duration::hours(1));

        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.get("dev_2").is_some());
    }
}
