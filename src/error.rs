//! Error taxonomy returned by the access-control core.
//!
//! Unknown identities and wrong secrets collapse into
//! [`AuthError::InvalidCredentials`]; lockout and throttling disclose the
//! remaining wait so a legitimate user knows when to retry.

use chrono::Duration;

/// Result alias used throughout the core.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("account locked, retry in {}s", .retry_after.num_seconds())]
    AccountLocked { retry_after: Duration },

    #[error("too many attempts, retry in {}s", .retry_after.num_seconds())]
    RateLimited { retry_after: Duration },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("token invalid")]
    TokenInvalid,

    #[error("session not found")]
    SessionNotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable kind name, suitable for structured responses and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::AccountLocked { .. } => "AccountLocked",
            Self::RateLimited { .. } => "RateLimited",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::TokenExpired => "TokenExpired",
            Self::TokenInvalid => "TokenInvalid",
            Self::SessionNotFound => "SessionNotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Remaining wait for lockout / throttling failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::AccountLocked { retry_after } | Self::RateLimited { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    pub(crate) fn internal(err: &anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::TokenExpired.code(), "TokenExpired");
        assert_eq!(AuthError::InvalidCredentials.code(), "InvalidCredentials");
        assert_eq!(
            AuthError::Validation("x".into()).code(),
            "ValidationError"
        );
        assert_eq!(AuthError::Internal("x".into()).code(), "InternalError");
    }

    #[test]
    fn lockout_discloses_wait() {
        let err = AuthError::AccountLocked {
            retry_after: Duration::seconds(90),
        };
        assert_eq!(err.retry_after(), Some(Duration::seconds(90)));
        assert!(err.to_string().contains("90s"));
        assert!(AuthError::InvalidCredentials.retry_after().is_none());
    }
}
