//! Password hashing and verification.
//!
//! Uses Argon2id; the PHC string embeds algorithm, parameters and salt so a
//! stored hash can be verified without any other input.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;

use crate::error::AuthError;

/// Hash verified against when the email is unknown, so a miss costs the same
/// as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("dummy-password-for-timing-1").ok());

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Malformed hashes verify as `false`. The digest comparison inside
/// `argon2` is constant-time.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Burn one verification against a fixed hash. Used on the unknown-email path.
pub fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_ref() {
        let _ = verify_password(password, hash);
    }
}

/// Hash on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("hash task failed: {e}")))?
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

/// Verify on the blocking pool. `None` runs the dummy verification and
/// always yields `false`.
pub async fn verify_password_blocking(
    password: String,
    hash: Option<String>,
) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            verify_dummy(&password);
            false
        }
    })
    .await
    .map_err(|e| AuthError::Internal(format!("verify task failed: {e}")))
}

/// Password policy applied at registration: at least 8 characters, at least
/// one letter and one digit.
pub fn validate_password_policy(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters long".into(),
        ));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(AuthError::Validation(
            "Password must contain at least one letter and one number".into(),
        ));
    }
    Ok(())
}
