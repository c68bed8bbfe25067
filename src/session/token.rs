//! Signed bearer tokens.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url without
//! padding) signed with HMAC-SHA256 under the process signing secret. A token
//! that names a device is only valid while the [`SessionRegistry`] holds a
//! live session for that device bound to the token's `jti`, which is how a
//! stateless token is revoked server-side.

use crate::auth::SigningSecret;
use crate::clock::{self, Clock};
use crate::config::TokenConfig;
use crate::error::{AuthError, AuthResult};
use crate::session::SessionRegistry;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id.
    pub sub: String,
    pub identity: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Token id; the device session is bound to it.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    /// Time of the password login this token descends from.
    pub auth_time: i64,
}

impl TokenClaims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.exp)
    }

    pub fn authenticated_at(&self) -> DateTime<Utc> {
        timestamp(self.auth_time)
    }

    /// Total validity: issued-at to expiry.
    pub fn lifetime(&self) -> Duration {
        Duration::seconds(self.exp - self.iat)
    }
}

/// Who a token is issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: String,
    pub identity: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// Outcome of a refresh request on a valid token.
#[derive(Debug, Clone)]
pub enum Refresh {
    Renewed(IssuedToken),
    /// More than the refresh window remains; keep using the current token.
    NotYetDue { expires_at: DateTime<Utc> },
    /// The absolute session lifetime has been reached.
    SessionLimitReached { expires_at: DateTime<Utc> },
}

pub struct TokenService {
    secret: SigningSecret,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    refresh_window: Duration,
    max_session: Duration,
}

impl TokenService {
    pub fn new(
        secret: SigningSecret,
        sessions: Arc<SessionRegistry>,
        config: &TokenConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            sessions,
            clock,
            refresh_window: clock::secs(config.refresh_window_secs),
            max_session: clock::secs(config.max_session_secs),
        }
    }

    /// Issue a token for `subject`, optionally bound to `device_id`.
    pub fn issue(
        &self,
        subject: &Subject,
        device_id: Option<&str>,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        if ttl <= Duration::zero() {
            return Err(AuthError::Validation("token ttl must be positive".into()));
        }
        let now = self.clock.now().timestamp();
        let claims = TokenClaims {
            sub: subject.user_id.clone(),
            identity: subject.identity.clone(),
            role: subject.role.clone(),
            device_id: device_id.map(str::to_owned),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.num_seconds().max(1),
            auth_time: now,
        };
        self.sign(claims)
    }

    /// Check signature, expiry and (for device-bound tokens) session liveness.
    pub fn verify(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.decode(token)?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::TokenExpired);
        }

        if let Some(device_id) = &claims.device_id {
            if !self.sessions.is_live(device_id, &claims.jti) {
                return Err(AuthError::SessionNotFound);
            }
        }

        Ok(claims)
    }

    /// Check the signature only. Expired or revoked tokens still decode.
    pub fn inspect(&self, token: &str) -> AuthResult<TokenClaims> {
        self.decode(token)
    }

    /// Renew a token that is inside its final refresh window.
    ///
    /// The new token keeps the presented token's total lifetime, never
    /// extends past `auth_time + max_session`, and takes over the device
    /// session.
    pub fn refresh(&self, token: &str) -> AuthResult<Refresh> {
        let claims = self.verify(token)?;
        let now = self.clock.now();
        let expires_at = claims.expires_at();

        if expires_at - now > self.refresh_window {
            return Ok(Refresh::NotYetDue { expires_at });
        }

        let cap = claims.authenticated_at() + self.max_session;
        let new_expiry = (now + claims.lifetime()).min(cap);
        if new_expiry <= expires_at {
            return Ok(Refresh::SessionLimitReached { expires_at });
        }

        let iat = now.timestamp();
        let renewed = self.sign(TokenClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp: new_expiry.timestamp(),
            ..claims
        })?;

        if let Some(device_id) = &renewed.claims.device_id {
            if !self
                .sessions
                .rebind(device_id, &renewed.claims.jti, renewed.expires_at())
            {
                return Err(AuthError::SessionNotFound);
            }
        }

        Ok(Refresh::Renewed(renewed))
    }

    fn sign(&self, claims: TokenClaims) -> AuthResult<IssuedToken> {
        let header = TokenHeader {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        };
        let header = serde_json::to_vec(&header)
            .map_err(|e| AuthError::Internal(format!("token header encoding failed: {e}")))?;
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| AuthError::Internal(format!("token claims encoding failed: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            claims,
        })
    }

    fn decode(&self, token: &str) -> AuthResult<TokenClaims> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::TokenInvalid);
        };

        let header_json = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| AuthError::TokenInvalid)?;
        let parsed: TokenHeader =
            serde_json::from_slice(&header_json).map_err(|_| AuthError::TokenInvalid)?;
        if parsed.alg != ALGORITHM {
            return Err(AuthError::TokenInvalid);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::TokenInvalid)?;
        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::TokenInvalid)?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::TokenInvalid)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload_json).map_err(|_| AuthError::TokenInvalid)?;

        if claims.sub.is_empty()
            || claims.jti.is_empty()
            || claims.exp <= claims.iat
            || claims.auth_time > claims.iat
        {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }

    fn mac(&self) -> AuthResult<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AuthError::Internal(format!("signing key rejected: {e}")))
    }
}

/// True when `value` has the three-segment shape of a token.
pub fn looks_like_token(value: &str) -> bool {
    value.split('.').count() == 3
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
