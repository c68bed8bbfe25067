//! Per-identity failed-login tracking with timed lockout.
//!
//! Checked before any credential lookup or hashing, so a locked identity
//! never reaches the secret comparison.

use crate::clock::{self, Clock};
use crate::config::LockoutConfig;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LockoutEntry {
    pub identity: String,
    pub failed_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// First failure counted toward the current threshold.
    pub window_start: DateTime<Utc>,
}

pub struct LockoutTracker {
    entries: Mutex<HashMap<String, LockoutEntry>>,
    max_failed_attempts: u32,
    lockout: Duration,
    clock: Arc<dyn Clock>,
}

impl LockoutTracker {
    pub fn new(config: &LockoutConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout: clock::secs(config.lockout_secs),
            clock,
        }
    }

    /// Fail with `AccountLocked` while the identity is locked. An elapsed
    /// lock resets the entry.
    pub fn check_locked(&self, identity: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let Some(until) = entries.get(identity).and_then(|e| e.locked_until) else {
            return Ok(());
        };

        if now < until {
            return Err(AuthError::AccountLocked {
                retry_after: until - now,
            });
        }

        entries.remove(identity);
        Ok(())
    }

    /// Count a failure. Returns the lock expiry when this failure locks the
    /// identity.
    pub fn record_failure(&self, identity: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(identity.to_owned())
            .or_insert_with(|| LockoutEntry {
                identity: identity.to_owned(),
                failed_count: 0,
                locked_until: None,
                window_start: now,
            });

        if entry.locked_until.is_none() && now - entry.window_start >= self.lockout {
            entry.failed_count = 0;
            entry.window_start = now;
        }

        entry.failed_count = entry.failed_count.saturating_add(1);
        if entry.failed_count >= self.max_failed_attempts && entry.locked_until.is_none() {
            let until = now + self.lockout;
            entry.locked_until = Some(until);
            tracing::warn!(
                identity = %identity,
                failed = entry.failed_count,
                locked_until = %until,
                "Identity locked after repeated failures"
            );
            return Some(until);
        }
        None
    }

    pub fn record_success(&self, identity: &str) {
        self.entries.lock().remove(identity);
    }

    pub fn entry(&self, identity: &str) -> Option<LockoutEntry> {
        self.entries.lock().get(identity).cloned()
    }

    /// Drop elapsed locks and failure windows that can no longer trigger one.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| match entry.locked_until {
            Some(until) => now < until,
            None => now - entry.window_start < self.lockout,
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (Arc<ManualClock>, LockoutTracker) {
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = LockoutTracker::new(&LockoutConfig::default(), clock.clone());
        (clock, tracker)
    }

    #[test]
    fn locks_after_five_failures() {
        let (_clock, tracker) = tracker();
        for _ in 0..4 {
            assert!(tracker.record_failure("a@x.com").is_none());
            assert!(tracker.check_locked("a@x.com").is_ok());
        }
        assert!(tracker.record_failure("a@x.com").is_some());

        let err = tracker.check_locked("a@x.com").unwrap_err();
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::zero());
        assert!(wait <= Duration::minutes(15));
    }

    #[test]
    fn lock_elapses_and_resets() {
        let (clock, tracker) = tracker();
        for _ in 0..5 {
            tracker.record_failure("a@x.com");
        }
        clock.advance(Duration::minutes(14));
        assert!(tracker.check_locked("a@x.com").is_err());

        clock.advance(Duration::minutes(1));
        assert!(tracker.check_locked("a@x.com").is_ok());
        assert!(tracker.entry("a@x.com").is_none());

        // Fresh counter after the reset.
        assert!(tracker.record_failure("a@x.com").is_none());
        assert_eq!(tracker.entry("a@x.com").unwrap().failed_count, 1);
    }

    #[test]
    fn success_deletes_entry() {
        let (_clock, tracker) = tracker();
        tracker.record_failure("a@x.com");
        tracker.record_failure("a@x.com");
        tracker.record_success("a@x.com");
        assert!(tracker.entry("a@x.com").is_none());
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let (clock, tracker) = tracker();
        for _ in 0..4 {
            tracker.record_failure("a@x.com");
        }
        clock.advance(Duration::minutes(16));
        assert!(tracker.record_failure("a@x.com").is_none());
        assert_eq!(tracker.entry("a@x.com").unwrap().failed_count, 1);
    }

    #[test]
    fn identities_are_independent() {
        let (_clock, tracker) = tracker();
        for _ in 0..5 {
            tracker.record_failure("a@x.com");
        }
        assert!(tracker.check_locked("a@x.com").is_err());
        assert!(tracker.check_locked("b@x.com").is_ok());
    }

    #[test]
    fn sweep_drops_elapsed_entries() {
        let (clock, tracker) = tracker();
        for _ in 0..5 {
            tracker.record_failure("locked@x.com");
        }
        tracker.record_failure("once@x.com");
        clock.advance(Duration::minutes(10));
        tracker.record_failure("recent@x.com");
        clock.advance(Duration::minutes(6));

        assert_eq!(tracker.sweep(), 2);
        assert!(tracker.entry("recent@x.com").is_some());
    }
}
