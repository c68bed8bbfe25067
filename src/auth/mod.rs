//! Credential collaborators of the access-control core.
//!
//! Provides:
//! - The [`CredentialStore`] trait plus a SQLite-backed implementation
//! - Salted PBKDF2-HMAC-SHA256 secret hashing
//! - Signing-secret provisioning (load-or-create, persisted across restarts)

pub mod password;
pub mod secret;
pub mod store;

pub use secret::SigningSecret;
pub use store::{normalize_identity, Credential, CredentialStore, SqliteCredentialStore};
