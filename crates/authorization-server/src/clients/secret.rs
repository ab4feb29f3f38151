//! Client secret generation and Argon2id hashing.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use super::ClientError;

/// Secret length in bytes (32 bytes = 256 bits).
const SECRET_LENGTH: usize = 32;

/// Generate a random client secret, base64url without padding.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a secret for storage using Argon2id with a random salt.
pub fn hash_secret(secret: &str) -> Result<String, ClientError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ClientError::Hash(e.to_string()))
}

/// Verify a presented secret against a stored PHC hash.
///
/// Argon2 compares digests in constant time. An unparseable stored hash
/// never verifies.
#[must_use]
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::error!("Stored client secret hash is not a valid PHC string");
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

pub(super) fn check_hash_format(stored_hash: &str) -> Result<(), ClientError> {
    PasswordHash::new(stored_hash)
        .map(|_| ())
        .map_err(|e| ClientError::Hash(format!("not a PHC hash string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_secret("secret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_secret("secret", &hash));
        assert!(!verify_secret("Secret", &hash));
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_secret("secret", "{noop}secret"));
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, generate_secret());
    }
}
