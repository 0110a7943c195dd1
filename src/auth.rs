//! Client password checks.
//!
//! The password file holds one line of the form `$sha256$<salt>$<hex digest>`,
//! where the digest is SHA-256 over the salt followed by the password. A
//! missing file, or a first line of three characters or fewer, turns
//! authentication off.

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// Read the stored hash from `path`.
///
/// Returns `None` when the file is absent or unreadable, or when its first
/// line is too short to be a hash.
pub fn load_password_file(path: &Path) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), ?e, "failed to read password file");
            return None;
        }
    };

    crate::config::check_config_permissions(path);

    let line = contents.lines().next().unwrap_or_default().trim();
    if line.len() <= 3 {
        return None;
    }
    Some(line.to_string())
}

/// Check `candidate` against the `stored` hash line.
pub fn verify(stored: &str, candidate: &str) -> bool {
    let Some((salt, expected)) = parse(stored) else {
        tracing::warn!("password file is not in $sha256$<salt>$<hex> form");
        return false;
    };
    let actual = digest(salt, candidate);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Produce a password-file line for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    format!("${SCHEME}${salt}${}", digest(&salt, password))
}

fn parse(stored: &str) -> Option<(&str, &str)> {
    let rest = stored.strip_prefix('$')?;
    let (scheme, rest) = rest.split_once('$')?;
    if scheme != SCHEME {
        return None;
    }
    let (salt, hex_digest) = rest.split_once('$')?;
    Some((salt, hex_digest))
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
