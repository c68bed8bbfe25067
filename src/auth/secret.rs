//! Signing-secret provisioning.
//!
//! The secret is generated once and persisted as hex so tokens issued before a
//! restart stay verifiable. Replacing the file invalidates every live token.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Bytes generated for a fresh secret.
const SECRET_BYTES: usize = 64;

/// Shortest secret accepted for HMAC-SHA256 signing.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SECRET_BYTES {
            bail!(
                "Signing secret too short ({} bytes, need at least {MIN_SECRET_BYTES})",
                bytes.len()
            );
        }
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        Self(rand::random::<[u8; SECRET_BYTES]>().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Load the secret at `path`, creating it when absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let secret = Self::generate();
        let mut file = match create_owner_only(path) {
            Ok(file) => file,
            // Another process provisioned it first.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Self::load(path),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to create signing secret {}", path.display()))
            }
        };
        file.write_all(hex::encode(&secret.0).as_bytes())
            .and_then(|()| file.sync_all())
            .with_context(|| format!("Failed to write signing secret {}", path.display()))?;

        tracing::info!(path = %path.display(), "Provisioned new signing secret");
        Ok(secret)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signing secret {}", path.display()))?;
        let bytes = hex::decode(raw.trim())
            .with_context(|| format!("Signing secret {} is not valid hex", path.display()))?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret([REDACTED; {}])", self.0.len())
    }
}

/// Create `path` exclusively, readable by the owner only from the first byte.
#[cfg(unix)]
fn create_owner_only(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_create_is_stable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys").join("signing.key");

        let first = SigningSecret::load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = SigningSecret::load_or_create(&path).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), SECRET_BYTES);
    }

    #[cfg(unix)]
    #[test]
    fn created_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");
        SigningSecret::load_or_create(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn exclusive_create_never_clobbers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");
        let existing = SigningSecret::generate();
        std::fs::write(&path, hex::encode(existing.as_bytes())).unwrap();

        let err = create_owner_only(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let loaded = SigningSecret::load_or_create(&path).unwrap();
        assert_eq!(loaded.as_bytes(), existing.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn owner_only_mode_is_set_at_creation() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");
        let file = create_owner_only(&path).unwrap();
        let mode = file.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn short_secret_rejected() {
        assert!(SigningSecret::from_bytes(vec![1u8; 16]).is_err());
        assert!(SigningSecret::from_bytes(vec![1u8; MIN_SECRET_BYTES]).is_ok());
    }

    #[test]
    fn garbage_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");
        std::fs::write(&path, "not-hex").unwrap();
        let err = SigningSecret::load(&path).unwrap_err();
        assert!(err.to_string().contains("not valid hex"));
    }

    #[test]
    fn debug_redacts() {
        let secret = SigningSecret::generate();
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode(secret.as_bytes())));
    }
}
