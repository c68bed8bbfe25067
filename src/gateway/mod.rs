//! Authentication gateway: the single entry point that composes lockout,
//! throttling, credential checks, token issuance, device sessions, the
//! permission cache and CSRF protection.
//!
//! Login runs these steps in order and stops at the first failure:
//!
//! 1. validate input
//! 2. lockout check (identity)
//! 3. rate limit (identity + source)
//! 4. credential lookup (bounded by `gateway.store_timeout_ms`)
//! 5. secret verification (on the blocking pool)
//! 6. token issue
//! 7. session register (supersedes any session on the same device)
//! 8. CSRF token issue
//!
//! In-memory state lives behind short `parking_lot` mutexes that are never
//! held across an `.await`.

mod types;

pub use types::{
    LoginOutcome, LoginRequest, RefreshResult, SweepReport, UserProfile, Verification,
};

use crate::auth::password::{self, MAX_SECRET_LEN};
use crate::auth::store::MAX_IDENTITY_LEN;
use crate::auth::{normalize_identity, CredentialStore, SigningSecret, SqliteCredentialStore};
use crate::clock::{self, Clock, SystemClock};
use crate::config::{Config, SweepConfig};
use crate::error::{AuthError, AuthResult};
use crate::permissions::{CacheStats, PermissionCache};
use crate::security::{
    login_key, CsrfGuard, DeviceRecord, DeviceTrust, DeviceTrustRegistry, LockoutTracker,
    RateLimiter, RatePurpose,
};
use crate::session::token::looks_like_token;
use crate::session::{Refresh, Session, SessionRegistry, Subject, TokenClaims, TokenService};
use chrono::Duration;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    lockout: LockoutTracker,
    login_limiter: RateLimiter,
    api_limiter: RateLimiter,
    tokens: TokenService,
    sessions: Arc<SessionRegistry>,
    permissions: PermissionCache,
    csrf: CsrfGuard,
    devices: DeviceTrustRegistry,
    device_idle: Duration,
    store_timeout: std::time::Duration,
    token_ttl: Duration,
    admin_role: String,
    min_password_length: usize,
    hash_rounds: u32,
    sweep: SweepConfig,
    /// Hash checked against when the identity is unknown, so both paths cost
    /// the same.
    dummy_hash: String,
}

impl AuthGateway {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        secret: SigningSecret,
    ) -> anyhow::Result<Self> {
        Self::with_clock(config, store, secret, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        secret: SigningSecret,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&clock)));
        let tokens = TokenService::new(
            secret,
            Arc::clone(&sessions),
            &config.token,
            Arc::clone(&clock),
        );

        Ok(Self {
            store,
            lockout: LockoutTracker::new(&config.lockout, Arc::clone(&clock)),
            login_limiter: RateLimiter::new(
                RatePurpose::Login,
                &config.rate_limit.login,
                Arc::clone(&clock),
            ),
            api_limiter: RateLimiter::new(
                RatePurpose::Api,
                &config.rate_limit.api,
                Arc::clone(&clock),
            ),
            tokens,
            sessions,
            permissions: PermissionCache::new(
                clock::secs(config.permissions.cache_ttl_secs),
                Arc::clone(&clock),
            ),
            csrf: CsrfGuard::new(clock::secs(config.csrf.ttl_secs), Arc::clone(&clock)),
            devices: DeviceTrustRegistry::new(Arc::clone(&clock)),
            device_idle: clock::secs(config.sweep.device_idle_secs),
            store_timeout: std::time::Duration::from_millis(config.gateway.store_timeout_ms),
            token_ttl: clock::secs(config.token.ttl_secs),
            admin_role: config.permissions.admin_role.trim().to_owned(),
            min_password_length: config.password.min_length,
            hash_rounds: config.password.hash_rounds,
            sweep: config.sweep.clone(),
            dummy_hash: password::hash_secret(
                &uuid::Uuid::new_v4().to_string(),
                config.password.hash_rounds,
            ),
            clock,
        })
    }

    /// Open the SQLite credential store and the signing secret named by
    /// `config`, creating the secret on first use.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let db_path = config.credential_db_path()?;
        let store = SqliteCredentialStore::open(&db_path, &config.password)?;
        let secret = SigningSecret::load_or_create(&config.signing_secret_path()?)?;
        tracing::info!(db = %db_path.display(), "Credential store opened");
        Self::new(config, Arc::new(store), secret)
    }

    // ── Login ───────────────────────────────────────────────────────

    pub async fn login(&self, request: LoginRequest) -> AuthResult<LoginOutcome> {
        let LoginRequest {
            identity,
            secret,
            device_id,
            source_address,
            user_agent,
        } = request;

        validate_identity(&identity)?;
        validate_secret(&secret)?;
        let identity = normalize_identity(&identity);

        if let Err(err) = self.lockout.check_locked(&identity) {
            tracing::info!(identity = %identity, "Login refused: account locked");
            return Err(err);
        }

        let rate_key = login_key(&identity, source_address.as_deref());
        if let Err(err) = self.login_limiter.consume(&rate_key) {
            tracing::warn!(key = %rate_key, "Login rate limit exceeded");
            return Err(err);
        }

        let credential = self
            .with_deadline("find_by_identity", self.store.find_by_identity(&identity))
            .await?;

        let stored_hash = credential
            .as_ref()
            .map_or_else(|| self.dummy_hash.clone(), |c| c.secret_hash.clone());
        let matched = self.check_secret(secret, stored_hash).await?;

        let credential = match credential {
            None => {
                self.lockout.record_failure(&identity);
                tracing::info!(identity = %identity, "Login failed: unknown identity");
                return Err(AuthError::InvalidCredentials);
            }
            Some(c) if !matched => {
                self.lockout.record_failure(&identity);
                tracing::warn!(user_id = %c.id, "Login failed: secret mismatch");
                return Err(AuthError::InvalidCredentials);
            }
            Some(c) if !c.active => {
                tracing::info!(user_id = %c.id, "Login refused: account inactive");
                return Err(AuthError::InvalidCredentials);
            }
            Some(c) => c,
        };

        self.lockout.record_success(&identity);
        self.login_limiter.reset(&rate_key);

        let device_id = device_id
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let subject = Subject {
            user_id: credential.id.clone(),
            identity: credential.identity.clone(),
            role: credential.role_id.clone(),
        };
        let issued = self
            .tokens
            .issue(&subject, Some(&device_id), self.token_ttl)?;

        let now = self.clock.now();
        let superseded = self.sessions.register(Session {
            user_id: credential.id.clone(),
            device_id: device_id.clone(),
            token_id: issued.claims.jti.clone(),
            issued_at: now,
            expires_at: issued.expires_at(),
            last_activity_at: now,
            ip_address: source_address,
            user_agent,
        });
        if let Some(previous) = superseded {
            tracing::info!(
                device_id = %device_id,
                previous_user_id = %previous.user_id,
                "Superseded existing session on device"
            );
        }

        match self.devices.record(&credential.id, &device_id) {
            DeviceTrust::New => {
                tracing::info!(
                    user_id = %credential.id,
                    device_id = %device_id,
                    "Login from new device"
                );
            }
            DeviceTrust::Reassigned { previous_user_id } => {
                tracing::warn!(
                    user_id = %credential.id,
                    device_id = %device_id,
                    previous_user_id = %previous_user_id,
                    "Device changed hands"
                );
            }
            DeviceTrust::Known => {}
        }

        let csrf_token = self.csrf.issue_for(&issued.token);
        tracing::info!(user_id = %credential.id, device_id = %device_id, "Login succeeded");

        Ok(LoginOutcome {
            expires_at: issued.expires_at(),
            token: issued.token,
            csrf_token,
            device_id,
            user: UserProfile {
                id: credential.id,
                identity: credential.identity,
                role: credential.role_id,
            },
        })
    }

    // ── Tokens ──────────────────────────────────────────────────────

    pub fn verify(&self, token: &str) -> Verification {
        Verification::from_result(self.authenticate(token))
    }

    /// Verify a token and record activity on its session.
    pub fn authenticate(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.tokens.verify(token)?;
        if let Some(device_id) = &claims.device_id {
            self.sessions.touch(device_id);
            self.devices.touch(device_id);
        }
        Ok(claims)
    }

    pub fn refresh(&self, token: &str) -> RefreshResult {
        match self.tokens.refresh(token) {
            Ok(Refresh::Renewed(issued)) => {
                self.csrf.revoke(token);
                let csrf_token = self.csrf.issue_for(&issued.token);
                if let Some(device_id) = &issued.claims.device_id {
                    self.devices.touch(device_id);
                }
                tracing::debug!(user_id = %issued.claims.sub, "Token refreshed");
                RefreshResult {
                    valid: true,
                    renewed: true,
                    expires_at: Some(issued.expires_at()),
                    token: Some(issued.token),
                    csrf_token: Some(csrf_token),
                    error: None,
                }
            }
            Ok(Refresh::NotYetDue { expires_at })
            | Ok(Refresh::SessionLimitReached { expires_at }) => RefreshResult {
                valid: true,
                renewed: false,
                expires_at: Some(expires_at),
                ..RefreshResult::default()
            },
            Err(error) => RefreshResult {
                error: Some(error),
                ..RefreshResult::default()
            },
        }
    }

    /// End the session the token is bound to. Expired tokens may still log
    /// out; a token whose session was already superseded is a no-op.
    pub fn logout(&self, token: &str) -> AuthResult<()> {
        let claims = self.tokens.inspect(token)?;
        self.csrf.revoke(token);
        if let Some(device_id) = &claims.device_id {
            if self.sessions.revoke_token(device_id, &claims.jti) {
                tracing::info!(user_id = %claims.sub, device_id = %device_id, "Logged out");
            }
        }
        Ok(())
    }

    // ── Sessions & devices ──────────────────────────────────────────

    pub fn invalidate_user_sessions(&self, user_id: &str) -> usize {
        let revoked = self.sessions.revoke_all_for_user(user_id);
        tracing::info!(user_id, revoked, "Invalidated user sessions");
        revoked
    }

    pub fn active_sessions(&self, user_id: &str) -> Vec<Session> {
        self.sessions.active_for_user(user_id)
    }

    pub fn devices(&self, user_id: &str) -> Vec<DeviceRecord> {
        self.devices.devices_for(user_id)
    }

    /// Forget a device and end its session.
    pub fn forget_device(&self, user_id: &str, device_id: &str) -> bool {
        if !self.devices.forget(user_id, device_id) {
            return false;
        }
        if self
            .sessions
            .get(device_id)
            .is_some_and(|session| session.user_id == user_id)
        {
            self.sessions.revoke(device_id);
        }
        true
    }

    /// Change the secret of the token's user, then revoke all of their
    /// sessions including the current one.
    pub async fn change_password(
        &self,
        token: &str,
        current_secret: &str,
        new_secret: &str,
    ) -> AuthResult<()> {
        let claims = self.authenticate(token)?;
        self.lockout.check_locked(&claims.identity)?;

        validate_secret(new_secret)?;
        if new_secret.chars().count() < self.min_password_length {
            return Err(AuthError::Validation(format!(
                "new secret must be at least {} characters",
                self.min_password_length
            )));
        }

        let credential = self
            .with_deadline("find_by_id", self.store.find_by_id(&claims.sub))
            .await?
            .filter(|c| c.active)
            .ok_or(AuthError::InvalidCredentials)?;

        if !self
            .check_secret(current_secret.to_owned(), credential.secret_hash.clone())
            .await?
        {
            self.lockout.record_failure(&credential.identity);
            tracing::warn!(user_id = %credential.id, "Password change refused: secret mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let rounds = self.hash_rounds;
        let new_secret = new_secret.to_owned();
        let new_hash =
            tokio::task::spawn_blocking(move || password::hash_secret(&new_secret, rounds))
                .await
                .map_err(|e| AuthError::Internal(format!("secret hashing task failed: {e}")))?;

        self.with_deadline(
            "update_secret_hash",
            self.store.update_secret_hash(&credential.id, &new_hash),
        )
        .await?;

        let revoked = self.sessions.revoke_all_for_user(&credential.id);
        tracing::info!(user_id = %credential.id, revoked, "Password changed");
        Ok(())
    }

    // ── Permissions ─────────────────────────────────────────────────

    /// True when `subject` (a user id or a bearer token) may perform
    /// `action` on `resource`. Any failure, including a store outage,
    /// answers `false`.
    pub async fn has_permission(&self, subject: &str, resource: &str, action: &str) -> bool {
        match self.check_permission(subject, resource, action).await {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::warn!(code = err.code(), "Permission check failed closed: {err}");
                false
            }
        }
    }

    /// Like [`Self::has_permission`] but reports why access was refused.
    pub async fn require_permission(
        &self,
        subject: &str,
        resource: &str,
        action: &str,
    ) -> AuthResult<()> {
        if self.check_permission(subject, resource, action).await? {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied)
        }
    }

    async fn check_permission(
        &self,
        subject: &str,
        resource: &str,
        action: &str,
    ) -> AuthResult<bool> {
        let Some(role) = self.resolve_role(subject).await? else {
            return Ok(false);
        };
        if role == self.admin_role {
            return Ok(true);
        }

        let granted = match self.permissions.get(&role) {
            Some(cached) => cached,
            None => {
                let loaded = self
                    .with_deadline("role_permissions", self.store.role_permissions(&role))
                    .await?;
                self.permissions.put(&role, loaded)
            }
        };
        Ok(granted.allows(resource, action))
    }

    async fn resolve_role(&self, subject: &str) -> AuthResult<Option<String>> {
        if looks_like_token(subject) {
            return Ok(Some(self.authenticate(subject)?.role));
        }
        let credential = self
            .with_deadline("find_by_id", self.store.find_by_id(subject))
            .await?;
        Ok(credential.filter(|c| c.active).map(|c| c.role_id))
    }

    pub fn invalidate_role_permissions(&self, role_id: &str) -> bool {
        self.permissions.invalidate(role_id)
    }

    pub fn invalidate_all_permissions(&self) -> usize {
        self.permissions.invalidate_all()
    }

    pub fn permission_cache_stats(&self) -> CacheStats {
        self.permissions.stats()
    }

    // ── CSRF ────────────────────────────────────────────────────────

    /// Issue a fresh CSRF token for an authenticated bearer token.
    pub fn issue_csrf(&self, token: &str) -> AuthResult<String> {
        self.authenticate(token)?;
        Ok(self.csrf.issue_for(token))
    }

    /// Every failure mode, including a dead session, answers `false`.
    pub fn verify_csrf(&self, token: &str, csrf_token: &str) -> bool {
        let bound = self.csrf.verify(token, csrf_token);
        bound && self.tokens.verify(token).is_ok()
    }

    // ── Throttling ──────────────────────────────────────────────────

    /// Spend one API point for `key` (typically a user id or address).
    pub fn throttle_api(&self, key: &str) -> AuthResult<u32> {
        self.api_limiter.consume(&format!("api:{key}"))
    }

    // ── Maintenance ─────────────────────────────────────────────────

    pub fn sweep_sessions(&self) -> usize {
        self.sessions.sweep_expired()
    }

    pub fn sweep_permissions(&self) -> usize {
        self.permissions.sweep_expired()
    }

    /// CSRF bindings, lockout entries, rate-limit windows and idle devices.
    pub fn sweep_ephemeral(&self) -> usize {
        self.csrf.sweep_expired()
            + self.lockout.sweep()
            + self.login_limiter.sweep_stale()
            + self.api_limiter.sweep_stale()
            + self.devices.sweep_stale(self.device_idle)
    }

    /// Run every sweep once.
    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            sessions: self.sessions.sweep_expired(),
            permissions: self.permissions.sweep_expired(),
            csrf: self.csrf.sweep_expired(),
            lockouts: self.lockout.sweep(),
            rate_limits: self.login_limiter.sweep_stale() + self.api_limiter.sweep_stale(),
            devices: self.devices.sweep_stale(self.device_idle),
        }
    }

    /// Start the periodic sweeps on the current runtime. Each task exits
    /// once the gateway is dropped.
    pub fn spawn_sweepers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            spawn_sweep(
                Arc::downgrade(self),
                "sessions",
                self.sweep.sessions_secs,
                Self::sweep_sessions,
            ),
            spawn_sweep(
                Arc::downgrade(self),
                "permissions",
                self.sweep.permissions_secs,
                Self::sweep_permissions,
            ),
            spawn_sweep(
                Arc::downgrade(self),
                "ephemeral",
                self.sweep.csrf_secs,
                Self::sweep_ephemeral,
            ),
        ]
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn check_secret(&self, secret: String, stored_hash: String) -> AuthResult<bool> {
        tokio::task::spawn_blocking(move || password::verify_secret(&secret, &stored_hash))
            .await
            .map_err(|e| AuthError::Internal(format!("secret verification task failed: {e}")))
    }

    /// Bound a credential-store call by the configured deadline.
    async fn with_deadline<T, F>(&self, operation: &'static str, call: F) -> AuthResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(operation, "Credential store call failed: {e:#}");
                Err(AuthError::internal(&e))
            }
            Err(_) => {
                tracing::error!(
                    operation,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Credential store call timed out"
                );
                Err(AuthError::Internal(format!("{operation} timed out")))
            }
        }
    }
}

fn spawn_sweep(
    gateway: Weak<AuthGateway>,
    name: &'static str,
    every_secs: u64,
    sweep: fn(&AuthGateway) -> usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(every_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(gateway) = gateway.upgrade() else {
                break;
            };
            let removed = sweep(&gateway);
            if removed > 0 {
                tracing::debug!(sweep = name, removed, "Swept expired entries");
            }
        }
    })
}

fn validate_identity(identity: &str) -> AuthResult<()> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(AuthError::Validation("identity is required".into()));
    }
    if trimmed.chars().count() > MAX_IDENTITY_LEN {
        return Err(AuthError::Validation(format!(
            "identity exceeds {MAX_IDENTITY_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_secret(secret: &str) -> AuthResult<()> {
    if secret.is_empty() {
        return Err(AuthError::Validation("secret is required".into()));
    }
    if secret.len() > MAX_SECRET_LEN {
        return Err(AuthError::Validation(format!(
            "secret exceeds {MAX_SECRET_LEN} bytes"
        )));
    }
    Ok(())
}
