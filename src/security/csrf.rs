//! Anti-forgery tokens bound to a bearer session.
//!
//! Bindings are keyed by the SHA-256 of the bearer token; the raw bearer is
//! never stored. Verification answers a plain `bool`: unknown, expired and
//! mismatched tokens all look the same to the caller.

use crate::auth::password::constant_time_eq;
use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Random bytes per CSRF token (256 bits).
const CSRF_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct CsrfBinding {
    csrf_token: String,
    expires_at: DateTime<Utc>,
}

pub struct CsrfGuard {
    /// session id hash -> binding
    bindings: Mutex<HashMap<String, CsrfBinding>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CsrfGuard {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Issue a fresh token for `bearer_token`, replacing any previous one.
    pub fn issue_for(&self, bearer_token: &str) -> String {
        let csrf_token = hex::encode(rand::random::<[u8; CSRF_TOKEN_BYTES]>());
        let binding = CsrfBinding {
            csrf_token: csrf_token.clone(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.bindings
            .lock()
            .insert(session_id_hash(bearer_token), binding);
        csrf_token
    }

    pub fn verify(&self, bearer_token: &str, supplied: &str) -> bool {
        let key = session_id_hash(bearer_token);
        let now = self.clock.now();
        let mut bindings = self.bindings.lock();

        let Some(binding) = bindings.get(&key) else {
            return false;
        };
        if now >= binding.expires_at {
            bindings.remove(&key);
            return false;
        }
        constant_time_eq(binding.csrf_token.as_bytes(), supplied.as_bytes())
    }

    /// Drop the binding for `bearer_token`.
    pub fn revoke(&self, bearer_token: &str) -> bool {
        self.bindings
            .lock()
            .remove(&session_id_hash(bearer_token))
            .is_some()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut bindings = self.bindings.lock();
        let before = bindings.len();
        bindings.retain(|_, binding| now < binding.expires_at);
        before - bindings.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-way digest of a bearer token.
pub fn session_id_hash(bearer_token: &str) -> String {
    hex::encode(Sha256::digest(bearer_token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn guard() -> (Arc<ManualClock>, CsrfGuard) {
        let clock = Arc::new(ManualClock::starting_now());
        let guard = CsrfGuard::new(Duration::hours(24), clock.clone());
        (clock, guard)
    }

    #[test]
    fn issued_token_verifies() {
        let (_clock, guard) = guard();
        let csrf = guard.issue_for("bearer-1");
        assert_eq!(csrf.len(), CSRF_TOKEN_BYTES * 2);
        assert!(guard.verify("bearer-1", &csrf));
        assert!(!guard.verify("bearer-2", &csrf));
    }

    #[test]
    fn failures_are_indistinguishable() {
        let (clock, guard) = guard();

        // Never issued.
        let never = guard.verify("bearer-none", "deadbeef");

        // Single character altered.
        let csrf = guard.issue_for("bearer-1");
        let mut altered = csrf.clone().into_bytes();
        altered[0] = if altered[0] == b'a' { b'b' } else { b'a' };
        let altered = String::from_utf8(altered).unwrap();
        let tampered = guard.verify("bearer-1", &altered);

        // Expired.
        let expiring = guard.issue_for("bearer-2");
        clock.advance(Duration::hours(24));
        let expired = guard.verify("bearer-2", &expiring);

        assert_eq!((never, tampered, expired), (false, false, false));
    }

    #[test]
    fn reissue_replaces_binding() {
        let (_clock, guard) = guard();
        let first = guard.issue_for("bearer-1");
        let second = guard.issue_for("bearer-1");
        assert!(!guard.verify("bearer-1", &first));
        assert!(guard.verify("bearer-1", &second));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn revoke_removes_binding() {
        let (_clock, guard) = guard();
        let csrf = guard.issue_for("bearer-1");
        assert!(guard.revoke("bearer-1"));
        assert!(!guard.verify("bearer-1", &csrf));
        assert!(!guard.revoke("bearer-1"));
    }

    #[test]
    fn sweep_evicts_expired() {
        let (clock, guard) = guard();
        guard.issue_for("old");
        clock.advance(Duration::hours(23));
        guard.issue_for("new");
        clock.advance(Duration::hours(2));
        assert_eq!(guard.sweep_expired(), 1);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn raw_bearer_is_never_a_key() {
        let (_clock, guard) = guard();
        guard.issue_for("bearer-secret");
        let bindings = guard.bindings.lock();
        assert!(!bindings.contains_key("bearer-secret"));
        assert!(bindings.contains_key(&session_id_hash("bearer-secret")));
    }
}
