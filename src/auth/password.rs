//! Argon2id password hashing.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::OnceLock;

/// Hash a password with a fresh random salt, returning the PHC string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// Verify a password against a stored PHC string.
///
/// Digest comparison inside the verifier is constant-time.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Spend one verification on a fixed hash so unknown emails cost the same as
/// wrong passwords.
pub fn burn_verification(password: &str) {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();

    let hash = DUMMY_HASH.get_or_init(|| hash_password("olympic-dummy-password").unwrap_or_default());
    let _ = verify_password(password, hash);
}
