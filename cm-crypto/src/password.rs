//! bcrypt-class password hashing for Credentials Manager users.
//!
//! A dummy hash is exposed so callers can equalize the timing of an
//! unknown-user lookup against a known-user wrong-password lookup (§4.4,
//! §8 property 6).

use bcrypt::{hash_with_salt, DEFAULT_COST};
use subtle::ConstantTimeEq;

/// A hashed password and the salt it was hashed with.
pub struct HashedPassword {
    pub salt: [u8; 16],
    pub hash: String,
}

/// Hash `password` with a freshly generated salt.
pub fn hash_and_salt(password: &str) -> Result<HashedPassword, bcrypt::BcryptError> {
    let mut salt = [0u8; 16];
    getrandom::getrandom(&mut salt).map_err(|e| bcrypt::BcryptError::Io(std::io::Error::other(e)))?;
    let hash = hash_with_salt(password.as_bytes(), DEFAULT_COST, salt)?.to_string();
    Ok(HashedPassword { salt, hash })
}

/// Hash `password` against a known salt, for verification.
pub fn hash_with_known_salt(password: &str, salt: [u8; 16]) -> Result<String, bcrypt::BcryptError> {
    Ok(hash_with_salt(password.as_bytes(), DEFAULT_COST, salt)?.to_string())
}

/// Constant-time comparison of two bcrypt hash strings.
pub fn hashes_match(computed: &str, stored: &str) -> bool {
    if computed.len() != stored.len() {
        return false;
    }
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// A fixed salt/hash pair used only to burn the same CPU time a real
/// lookup would, when the username does not exist (§4.4).
pub fn dummy_hash_for_timing_equalization(password: &str) -> String {
    const DUMMY_SALT: [u8; 16] = *b"cm-dummy-salt-16";
    hash_with_known_salt(password, DUMMY_SALT).unwrap_or_default()
}
