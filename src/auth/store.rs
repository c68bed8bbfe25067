//! Credential store: the trait the core reads users and role grants through,
//! plus a SQLite-backed implementation.
//!
//! Tables:
//! - `users`: id, identity, secret_hash, role_id, active, created_at
//! - `role_permissions`: role_id, resource, action

use crate::auth::password;
use crate::config::PasswordConfig;
use crate::permissions::RolePermissions;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;

/// Longest identity accepted.
pub const MAX_IDENTITY_LEN: usize = 254;

/// A stored user credential.
#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub identity: String,
    pub secret_hash: String,
    pub role_id: String,
    pub active: bool,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("secret_hash", &"[REDACTED]")
            .field("role_id", &self.role_id)
            .field("active", &self.active)
            .finish()
    }
}

/// Lookup of user and role records.
///
/// Implementations own durable storage; the core only reads through this
/// trait, except for [`update_secret_hash`](Self::update_secret_hash) during
/// password changes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a credential by its (already normalized) identity.
    async fn find_by_identity(&self, identity: &str) -> Result<Option<Credential>>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Credential>>;

    async fn role_permissions(&self, role_id: &str) -> Result<RolePermissions>;

    async fn update_secret_hash(&self, user_id: &str, secret_hash: &str) -> Result<()>;
}

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    conn: Mutex<rusqlite::Connection>,
    hash_rounds: u32,
    min_secret_len: usize,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at the given path.
    pub fn open(db_path: &Path, password: &PasswordConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init(conn, password)
    }

    pub fn open_in_memory(password: &PasswordConfig) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn, password)
    }

    fn init(conn: rusqlite::Connection, password: &PasswordConfig) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL UNIQUE COLLATE NOCASE,
                secret_hash TEXT NOT NULL,
                role_id TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role_id);

            CREATE TABLE IF NOT EXISTS role_permissions (
                role_id TEXT NOT NULL,
                resource TEXT NOT NULL,
                action TEXT NOT NULL,
                PRIMARY KEY (role_id, resource, action)
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            hash_rounds: password.hash_rounds,
            min_secret_len: password.min_length,
        })
    }

    // ── User Management ─────────────────────────────────────────────

    /// Create a user. Returns the user ID.
    pub fn create_user(&self, identity: &str, secret: &str, role_id: &str) -> Result<String> {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            bail!("Identity cannot be empty");
        }
        if identity.len() > MAX_IDENTITY_LEN {
            bail!("Identity too long (max {MAX_IDENTITY_LEN} characters)");
        }
        if secret.chars().count() < self.min_secret_len {
            bail!("Secret must be at least {} characters", self.min_secret_len);
        }
        if secret.len() > password::MAX_SECRET_LEN {
            bail!("Secret too long (max {} bytes)", password::MAX_SECRET_LEN);
        }
        if role_id.trim().is_empty() {
            bail!("Role cannot be empty");
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        let secret_hash = password::hash_secret(secret, self.hash_rounds);
        let now = chrono::Utc::now().timestamp();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, identity, secret_hash, role_id, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![user_id, identity, secret_hash, role_id.trim(), now],
        );

        match result {
            Ok(_) => Ok(user_id),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Identity '{}' is already registered", identity)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            rusqlite::params![active, user_id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_role(&self, user_id: &str, role_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET role_id = ?1 WHERE id = ?2",
            rusqlite::params![role_id, user_id],
        )?;
        Ok(updated > 0)
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    // ── Role Grants ─────────────────────────────────────────────────

    /// Grant `action` on `resource` to a role. Idempotent.
    pub fn grant(&self, role_id: &str, resource: &str, action: &str) -> Result<()> {
        if role_id.trim().is_empty() || resource.trim().is_empty() || action.trim().is_empty() {
            bail!("Role, resource and action are all required");
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO role_permissions (role_id, resource, action)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![role_id.trim(), resource.trim(), action.trim()],
        )?;
        Ok(())
    }

    pub fn revoke_grant(&self, role_id: &str, resource: &str, action: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM role_permissions WHERE role_id = ?1 AND resource = ?2 AND action = ?3",
            rusqlite::params![role_id, resource, action],
        )?;
        Ok(deleted > 0)
    }

    fn query_user(&self, column: &str, value: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT id, identity, secret_hash, role_id, active FROM users WHERE {column} = ?1"
        );
        let row = conn.query_row(&sql, rusqlite::params![value], |row| {
            Ok(Credential {
                id: row.get(0)?,
                identity: row.get(1)?,
                secret_hash: row.get(2)?,
                role_id: row.get(3)?,
                active: row.get(4)?,
            })
        });

        match row {
            Ok(credential) => Ok(Some(credential)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_by_identity(&self, identity: &str) -> Result<Option<Credential>> {
        self.query_user("identity", &normalize_identity(identity))
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Credential>> {
        self.query_user("id", user_id)
    }

    async fn role_permissions(&self, role_id: &str) -> Result<RolePermissions> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT resource, action FROM role_permissions WHERE role_id = ?1",
        )?;
        let perms = stmt
            .query_map(rusqlite::params![role_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<RolePermissions, _>>()?;
        Ok(perms)
    }

    async fn update_secret_hash(&self, user_id: &str, secret_hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET secret_hash = ?1 WHERE id = ?2",
            rusqlite::params![secret_hash, user_id],
        )?;
        if updated == 0 {
            bail!("No user with id {user_id}");
        }
        Ok(())
    }
}

/// Identities compare case-insensitively and ignore surrounding whitespace.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

// ── Tests ───────────────────────────────────────────────────────────
