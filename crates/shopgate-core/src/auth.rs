//! Credential helpers: API keys, resource identifiers, password hashes.
//!
//! API keys are opaque random tokens compared by exact lookup; resource
//! identifiers are the short human-enterable codes printed on device
//! labels. Password hashing backs the bootstrap admin account only,
//! the dashboard login surface lives outside this server.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::Rng;

const RESOURCE_ID_LEN: usize = 6;
const RESOURCE_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a 64-character hex API key.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Generate a 6-character resource identifier (A-Z, 0-9).
pub fn generate_resource_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RESOURCE_ID_LEN)
        .map(|_| RESOURCE_ID_CHARS[rng.gen_range(0..RESOURCE_ID_CHARS.len())] as char)
        .collect()
}

/// Hash a password using argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
