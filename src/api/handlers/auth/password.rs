//! Argon2id password hashing.
//!
//! Hashes are stored as PHC strings (`$argon2id$v=19$...`), so the salt and
//! parameters travel with the hash.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a password using Argon2id. Returns a PHC-format string.
///
/// # Errors
/// Returns an error if hashing fails.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("failed to hash password: {e}"))
}

/// Verify a password against a stored PHC-format hash.
///
/// Returns `Ok(false)` on mismatch and `Err` if the stored hash is malformed.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub(crate) fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash on the blocking pool; Argon2id is deliberately slow.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task panics.
pub(crate) async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
}

/// Verify on the blocking pool.
///
/// # Errors
/// Returns an error if the stored hash is malformed or the blocking task panics.
pub(crate) async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task failed")?
}
