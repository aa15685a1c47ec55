// ── One-way secret hashing ──
//
// Argon2id in PHC string form. Used for user passwords and for the
// secret half of service tokens.

use std::sync::LazyLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use super::AuthError;

/// Hash of a random secret, checked when a login names no known user so the
/// miss costs the same as a wrong password.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    let secret = SaltString::generate(&mut OsRng);
    hash_secret(secret.as_str()).unwrap_or_default()
});

pub fn hash_secret(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Constant-time check of `plain` against a stored PHC string. A
/// malformed hash never verifies.
pub fn verify_secret(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Spend one full verification on a hash no caller knows the secret of.
pub fn verify_dummy(plain: &str) {
    let _ = verify_secret(plain, &DUMMY_HASH);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_secret("hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_secret("hunter2", &hash));
        assert!(!verify_secret("hunter3", &hash));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash_secret("same").unwrap(), hash_secret("same").unwrap());
    }

    #[test]
    fn dummy_verification_hashes_and_fails() {
        verify_dummy("admin");
        assert!(DUMMY_HASH.starts_with("$argon2id$"));
        assert!(!verify_secret("", &DUMMY_HASH));
        assert!(!verify_secret("admin", &DUMMY_HASH));
    }

    #[test]
    fn garbage_hash_is_rejected() {
        assert!(!verify_secret("x", "not-a-phc-string"));
        assert!(!verify_secret("x", ""));
    }
}
