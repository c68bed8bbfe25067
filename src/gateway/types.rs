//! Request and result shapes for [`super::AuthGateway`] operations.

use crate::error::AuthError;
use crate::session::TokenClaims;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A password login attempt.
#[derive(Clone, Default)]
pub struct LoginRequest {
    pub identity: String,
    pub secret: String,
    /// Client-chosen device id; one is generated when absent.
    pub device_id: Option<String>,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
}

impl LoginRequest {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn from_source(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .field("source_address", &self.source_address)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub identity: String,
    pub role: String,
}

/// Everything a client needs after a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub csrf_token: String,
    pub device_id: String,
    pub user: UserProfile,
    pub expires_at: DateTime<Utc>,
}

/// Result of checking a bearer token. Never an `Err`: failures are carried
/// in `error` so callers can map them to a response uniformly.
#[derive(Debug)]
pub struct Verification {
    pub valid: bool,
    pub claims: Option<TokenClaims>,
    pub error: Option<AuthError>,
}

impl Verification {
    pub(crate) fn from_result(result: crate::error::AuthResult<TokenClaims>) -> Self {
        match result {
            Ok(claims) => Self {
                valid: true,
                claims: Some(claims),
                error: None,
            },
            Err(error) => Self {
                valid: false,
                claims: None,
                error: Some(error),
            },
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(AuthError::code)
    }
}

/// Result of a refresh request.
///
/// `valid && !renewed` means the presented token is fine but was not
/// replaced: either it is not yet inside the refresh window or the session
/// has reached its absolute lifetime.
#[derive(Debug, Default)]
pub struct RefreshResult {
    pub valid: bool,
    pub renewed: bool,
    pub token: Option<String>,
    pub csrf_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<AuthError>,
}

impl RefreshResult {
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(AuthError::code)
    }
}

/// Entries removed by one sweep pass, per store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub permissions: usize,
    pub csrf: usize,
    pub lockouts: usize,
    pub rate_limits: usize,
    pub devices: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.sessions
            + self.permissions
            + self.csrf
            + self.lockouts
            + self.rate_limits
            + self.devices
    }
}
