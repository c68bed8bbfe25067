//! TOML configuration for the access-control core.
//!
//! Every field has a default, so an absent file (or an absent section) yields
//! a working configuration. Durations are stored as whole seconds or
//! milliseconds, mirroring the field suffix.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound accepted for any configured duration: ten years.
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Config file name inside the platform config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lockout: LockoutConfig,
    pub rate_limit: RateLimitSection,
    pub token: TokenConfig,
    pub permissions: PermissionsConfig,
    pub csrf: CsrfConfig,
    pub sweep: SweepConfig,
    pub password: PasswordConfig,
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Failures within the window that trigger a lockout.
    pub max_failed_attempts: u32,
    /// Lockout duration, also the window failures are counted in.
    pub lockout_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_secs: 15 * 60,
        }
    }
}

/// Each limiter fills fields missing from its table with its own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    #[serde(deserialize_with = "login_limit")]
    pub login: RateLimitConfig,
    #[serde(deserialize_with = "api_limit")]
    pub api: RateLimitConfig,
}

/// Point budget per window; `points = 0` disables the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    pub points: u32,
    pub window_secs: u64,
    pub block_secs: u64,
}

impl RateLimitConfig {
    pub fn login_defaults() -> Self {
        Self {
            points: 10,
            window_secs: 15 * 60,
            block_secs: 15 * 60,
        }
    }

    pub fn api_defaults() -> Self {
        Self {
            points: 100,
            window_secs: 60,
            block_secs: 60,
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            login: RateLimitConfig::login_defaults(),
            api: RateLimitConfig::api_defaults(),
        }
    }
}

/// A `[rate_limit.*]` table as written; absent fields are `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialRateLimit {
    points: Option<u32>,
    window_secs: Option<u64>,
    block_secs: Option<u64>,
}

impl PartialRateLimit {
    fn over(self, base: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            points: self.points.unwrap_or(base.points),
            window_secs: self.window_secs.unwrap_or(base.window_secs),
            block_secs: self.block_secs.unwrap_or(base.block_secs),
        }
    }
}

fn login_limit<'de, D>(deserializer: D) -> std::result::Result<RateLimitConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialRateLimit::deserialize(deserializer).map(|p| p.over(RateLimitConfig::login_defaults()))
}

fn api_limit<'de, D>(deserializer: D) -> std::result::Result<RateLimitConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialRateLimit::deserialize(deserializer).map(|p| p.over(RateLimitConfig::api_defaults()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime of tokens minted at login.
    pub ttl_secs: u64,
    /// Refresh is only accepted when at most this much validity remains.
    pub refresh_window_secs: u64,
    /// Absolute cap measured from the original login.
    pub max_session_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 2 * 3600,
            refresh_window_secs: 3600,
            max_session_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub cache_ttl_secs: u64,
    /// Role id that is granted everything without consulting the cache.
    pub admin_role: String,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            admin_role: "admin".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub ttl_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self { ttl_secs: 24 * 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub sessions_secs: u64,
    pub permissions_secs: u64,
    /// CSRF bindings, lockout / rate-limit state and idle devices.
    pub csrf_secs: u64,
    /// Devices unused for this long are forgotten.
    pub device_idle_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sessions_secs: 60,
            permissions_secs: 300,
            csrf_secs: 600,
            device_idle_secs: 30 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// PBKDF2 iterations for newly hashed secrets.
    pub hash_rounds: u32,
    pub min_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            hash_rounds: crate::auth::password::DEFAULT_HASH_ROUNDS,
            min_length: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deadline for a single credential-store call.
    pub store_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite credential database. Defaults to the platform data directory.
    pub credential_db: Option<PathBuf>,
    /// Signing secret file. Defaults to the platform data directory.
    pub signing_secret: Option<PathBuf>,
}

impl Config {
    /// Load from `path`, or from the platform config directory when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lockout.max_failed_attempts == 0 {
            bail!("lockout.max_failed_attempts must be at least 1");
        }
        check_duration("lockout.lockout_secs", self.lockout.lockout_secs)?;

        for (name, limit) in [
            ("rate_limit.login", &self.rate_limit.login),
            ("rate_limit.api", &self.rate_limit.api),
        ] {
            if limit.points > 0 {
                check_duration(&format!("{name}.window_secs"), limit.window_secs)?;
                check_duration(&format!("{name}.block_secs"), limit.block_secs)?;
            }
        }

        check_duration("token.ttl_secs", self.token.ttl_secs)?;
        check_duration("token.refresh_window_secs", self.token.refresh_window_secs)?;
        check_duration("token.max_session_secs", self.token.max_session_secs)?;
        if self.token.max_session_secs < self.token.ttl_secs {
            bail!("token.max_session_secs must not be shorter than token.ttl_secs");
        }

        check_duration("permissions.cache_ttl_secs", self.permissions.cache_ttl_secs)?;
        if self.permissions.admin_role.trim().is_empty() {
            bail!("permissions.admin_role cannot be empty");
        }

        check_duration("csrf.ttl_secs", self.csrf.ttl_secs)?;
        check_duration("sweep.sessions_secs", self.sweep.sessions_secs)?;
        check_duration("sweep.permissions_secs", self.sweep.permissions_secs)?;
        check_duration("sweep.csrf_secs", self.sweep.csrf_secs)?;
        check_duration("sweep.device_idle_secs", self.sweep.device_idle_secs)?;
        if self.sweep.device_idle_secs < self.token.max_session_secs {
            bail!("sweep.device_idle_secs must not be shorter than token.max_session_secs");
        }

        if self.password.hash_rounds == 0 {
            bail!("password.hash_rounds must be at least 1");
        }
        if self.gateway.store_timeout_ms == 0 {
            bail!("gateway.store_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Credential database path, falling back to the platform data directory.
    pub fn credential_db_path(&self) -> Result<PathBuf> {
        match &self.storage.credential_db {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("credentials.db")),
        }
    }

    /// Signing secret path, falling back to the platform data directory.
    pub fn signing_secret_path(&self) -> Result<PathBuf> {
        match &self.storage.signing_secret {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("signing.key")),
        }
    }
}

fn check_duration(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        bail!("{name} must be greater than zero");
    }
    if value > MAX_DURATION_SECS {
        bail!("{name} is too large (max {MAX_DURATION_SECS})");
    }
    Ok(())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "contract-auth")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn data_dir() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("Could not determine a data directory for this platform")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.lockout.max_failed_attempts, 5);
        assert_eq!(config.lockout.lockout_secs, 900);
        assert_eq!(config.permissions.cache_ttl_secs, 300);
        assert_eq!(config.csrf.ttl_secs, 86_400);
        assert_eq!(config.token.refresh_window_secs, 3600);
        assert_eq!(config.rate_limit.api.points, 100);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [lockout]
            max_failed_attempts = 3

            [rate_limit.api]
            points = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.lockout.max_failed_attempts, 3);
        assert_eq!(config.lockout.lockout_secs, 900);
        assert_eq!(config.rate_limit.api.points, 20);
        assert_eq!(config.rate_limit.api.window_secs, 60);
        assert_eq!(config.rate_limit.login, RateLimitConfig::login_defaults());
    }

    #[test]
    fn partial_limiter_tables_use_their_own_defaults() {
        let config = Config::from_toml(
            r#"
            [rate_limit.api]
            points = 50

            [rate_limit.login]
            block_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(
            config.rate_limit.api,
            RateLimitConfig {
                points: 50,
                window_secs: 60,
                block_secs: 60,
            }
        );
        assert_eq!(
            config.rate_limit.login,
            RateLimitConfig {
                points: 10,
                window_secs: 900,
                block_secs: 30,
            }
        );
    }

    #[test]
    fn rendered_limits_load_back_unchanged() {
        let config = Config::default();
        let reloaded = Config::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reloaded.rate_limit.login, config.rate_limit.login);
        assert_eq!(reloaded.rate_limit.api, config.rate_limit.api);
    }

    #[test]
    fn zero_durations_rejected() {
        let err = Config::from_toml("[csrf]\nttl_secs = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("csrf.ttl_secs"));
    }

    #[test]
    fn session_cap_must_cover_ttl() {
        let err = Config::from_toml("[token]\nttl_secs = 7200\nmax_session_secs = 60\n")
            .unwrap_err();
        assert!(err.to_string().contains("max_session_secs"));
    }

    #[test]
    fn device_idle_must_outlast_sessions() {
        let err = Config::from_toml("[sweep]\ndevice_idle_secs = 3600\n").unwrap_err();
        assert!(err.to_string().contains("device_idle_secs"));
        let config = Config::from_toml("[sweep]\ndevice_idle_secs = 86400\n").unwrap();
        assert_eq!(config.sweep.device_idle_secs, 86_400);
    }

    #[test]
    fn disabled_limiter_skips_window_checks() {
        let config =
            Config::from_toml("[rate_limit.api]\npoints = 0\nwindow_secs = 0\n").unwrap();
        assert_eq!(config.rate_limit.api.points, 0);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.lockout.max_failed_attempts, 5);
    }

    #[test]
    fn load_and_render_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[permissions]\nadmin_role = \"owner\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.permissions.admin_role, "owner");

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("admin_role = \"owner\""));
    }

    #[test]
    fn explicit_storage_paths_win() {
        let mut config = Config::default();
        config.storage.signing_secret = Some(PathBuf::from("/tmp/x.key"));
        assert_eq!(
            config.signing_secret_path().unwrap(),
            PathBuf::from("/tmp/x.key")
        );
    }
}
