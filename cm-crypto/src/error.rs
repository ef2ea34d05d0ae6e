//! Error kinds for the envelope-encryption layer.
//!
//! Each operation gets its own newtype wrapper rather than one shared enum,
//! so a caller's `match` can't accidentally widen to variants that operation
//! never produces.

use core::fmt;

/// Key or IV was not one of the lengths the mechanism accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// AES key length must be 16, 24, or 32 bytes.
    BadKeyLength(usize),
    /// IV length must be 8 or 16 bytes.
    BadIvLength(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::BadKeyLength(n) => write!(f, "invalid key length {} (want 16, 24, or 32)", n),
            KeyError::BadIvLength(n) => write!(f, "invalid iv length {} (want 8 or 16)", n),
        }
    }
}

impl std::error::Error for KeyError {}

/// The HSM (or its software stand-in) could not complete wrap/unwrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HsmError {
    /// The PKCS#11 module could not be loaded.
    ModuleLoad(String),
    /// A session could not be opened or the login failed.
    Session(String),
    /// The master key could not be located by label/class.
    KeyNotFound(String),
    /// The mechanism rejected the input (bad length, bad padding, ...).
    Mechanism(String),
}

impl fmt::Display for HsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HsmError::ModuleLoad(m) => write!(f, "cannot load HSM module: {}", m),
            HsmError::Session(m) => write!(f, "HSM session error: {}", m),
            HsmError::KeyNotFound(m) => write!(f, "HSM master key not found: {}", m),
            HsmError::Mechanism(m) => write!(f, "HSM mechanism rejected input: {}", m),
        }
    }
}

impl std::error::Error for HsmError {}

/// Credential ciphertext failed to encrypt or decrypt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CipherError {
    /// Plaintext could not be serialized to canonical JSON.
    Encoding(String),
    /// Padding was malformed on decrypt (CBC path only).
    Padding,
    /// Ciphertext length is not a multiple of the block size, or too short.
    Length,
    /// The on-disk format byte is not one this build understands.
    UnknownFormat(u8),
    /// AEAD tag verification failed.
    Authentication,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::Encoding(m) => write!(f, "could not encode credential payload: {}", m),
            CipherError::Padding => write!(f, "invalid PKCS7 padding"),
            CipherError::Length => write!(f, "ciphertext has invalid length"),
            CipherError::UnknownFormat(b) => write!(f, "unknown credential ciphertext format byte 0x{:02x}", b),
            CipherError::Authentication => write!(f, "AEAD authentication failed"),
        }
    }
}

impl std::error::Error for CipherError {}

impl From<KeyError> for HsmError {
    fn from(e: KeyError) -> Self {
        HsmError::Mechanism(e.to_string())
    }
}
