//! PBKDF2-HMAC-SHA256 secret hashing.
//!
//! Encoded form: `pbkdf2-sha256$<rounds>$<salt-hex>$<key-hex>`. The round
//! count travels with the hash so raising the default never invalidates
//! stored credentials.

use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Default PBKDF2 iteration count for newly hashed secrets.
pub const DEFAULT_HASH_ROUNDS: u32 = 100_000;

/// Longest secret accepted, in bytes.
pub const MAX_SECRET_LEN: usize = 1024;

const SALT_BYTES: usize = 16;
const KEY_BYTES: usize = 32;

const SCHEME: &str = "pbkdf2-sha256";

/// Hash a secret with a fresh random salt.
pub fn hash_secret(secret: &str, rounds: u32) -> String {
    let salt = rand::random::<[u8; SALT_BYTES]>();
    let rounds = rounds.max(1);
    let key = derive(secret, &salt, rounds);
    format!(
        "{SCHEME}${rounds}${}${}",
        hex::encode(salt),
        hex::encode(key)
    )
}

/// Check `secret` against an encoded hash. Malformed hashes never match.
pub fn verify_secret(secret: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Some(rounds) = rounds.parse::<u32>().ok().filter(|r| *r > 0) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if salt.is_empty() || expected.len() != KEY_BYTES {
        return false;
    }

    constant_time_eq(&derive(secret, &salt, rounds), &expected)
}

fn derive(secret: &str, salt: &[u8], rounds: u32) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, rounds, &mut key);
    key
}

/// Length-checked constant-time comparison.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
