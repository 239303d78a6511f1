//! Password hashing and session tokens.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::UserError;

const TOKEN_BYTES: usize = 32;

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, UserError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| UserError::Hashing(e.to_string()))
}

/// Verify a password against a stored PHC string.
pub fn verify_password(password: &str, hash: &str) -> Result<(), UserError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| UserError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| UserError::InvalidCredentials)
}

/// An opaque bearer credential handed out on register and login.
///
/// Only its [`digest`](SessionToken::digest) is ever stored.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// 256 random bits, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wraps a token presented by a client.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the token, hex-encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("secret1", &hash).is_ok());
        assert!(matches!(
            verify_password("secret2", &hash),
            Err(UserError::InvalidCredentials)
        ));
    }

    #[test]
    fn garbage_hash_is_a_mismatch() {
        assert!(matches!(
            verify_password("secret1", "not-a-phc-string"),
            Err(UserError::InvalidCredentials)
        ));
    }

    #[test]
    fn tokens_are_random_hex() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_stable_and_hides_the_token() {
        let token = SessionToken::from_raw("abc");
        assert_eq!(token.digest(), SessionToken::from_raw("abc").digest());
        assert_ne!(token.digest(), "abc");
        assert_eq!(token.digest().len(), 64);
    }

    #[test]
    fn debug_does_not_print_the_token() {
        let token = SessionToken::from_raw("topsecret");
        assert!(!format!("{token:?}").contains("topsecret"));
    }
}
