//! Windowed point-budget rate limiting.
//!
//! Each key gets `points` attempts per fixed window. Consuming past the budget
//! blocks the key for `block` from that moment; the block outlives a window
//! rollover, and a fresh budget starts once it ends. Two instances run side
//! by side: one for login attempts, one for general API calls.
//!
//! ## Design
//! - In-memory state per key, guarded by a single mutex
//! - Stale entry cleanup on the periodic sweep
//! - `points = 0` disables the limiter

use crate::clock::{self, Clock};
use crate::config::RateLimitConfig;
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Source address recorded when the caller did not supply one.
const UNKNOWN_SOURCE: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatePurpose {
    Login,
    Api,
}

impl RatePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Api => "api",
        }
    }
}

/// Per-key throttle state.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub purpose: RatePurpose,
    pub key: String,
    pub remaining_points: u32,
    pub window_start: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    purpose: RatePurpose,
    points: u32,
    window: Duration,
    block: Duration,
    states: Mutex<HashMap<String, RateLimitState>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(purpose: RatePurpose, config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            purpose,
            points: config.points,
            window: clock::secs(config.window_secs),
            block: clock::secs(config.block_secs),
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn purpose(&self) -> RatePurpose {
        self.purpose
    }

    pub fn is_enabled(&self) -> bool {
        self.points > 0
    }

    /// Spend one point for `key`. Returns the points left in the window.
    pub fn consume(&self, key: &str) -> AuthResult<u32> {
        if !self.is_enabled() {
            return Ok(u32::MAX);
        }

        let now = self.clock.now();
        let mut states = self.states.lock();
        let state = states.entry(key.to_owned()).or_insert_with(|| RateLimitState {
            purpose: self.purpose,
            key: key.to_owned(),
            remaining_points: self.points,
            window_start: now,
            blocked_until: None,
        });

        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(AuthError::RateLimited {
                    retry_after: until - now,
                });
            }
            // A served block starts a fresh budget.
            state.blocked_until = None;
            state.window_start = now;
            state.remaining_points = self.points;
        }

        if now - state.window_start >= self.window {
            state.window_start = now;
            state.remaining_points = self.points;
        }

        if state.remaining_points == 0 {
            let until = now + self.block;
            state.blocked_until = Some(until);
            tracing::warn!(
                purpose = self.purpose.as_str(),
                key = %state.key,
                "Rate limit exhausted, key blocked"
            );
            return Err(AuthError::RateLimited {
                retry_after: self.block,
            });
        }

        state.remaining_points -= 1;
        Ok(state.remaining_points)
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        self.states.lock().remove(key);
    }

    /// Snapshot of the state for `key`, if tracked.
    pub fn state(&self, key: &str) -> Option<RateLimitState> {
        self.states.lock().get(key).cloned()
    }

    /// Drop entries whose window and block have both elapsed.
    pub fn sweep_stale(&self) -> usize {
        let now = self.clock.now();
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, state| {
            let blocked = state.blocked_until.is_some_and(|until| now < until);
            blocked || now - state.window_start < self.window
        });
        before - states.len()
    }

    /// Get the number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.states.lock().len()
    }
}

/// Compose the login throttle key: `login:{identity}:{source}`.
pub fn login_key(identity: &str, source_address: Option<&str>) -> String {
    let source = source_address
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SOURCE);
    format!("{}:{identity}:{source}", RatePurpose::Login.as_str())
}
