//! The data key: a per-credential AES key plus the two IVs it is used with.
//!
//! A data key is generated once per credential, used to encrypt exactly one
//! credential payload, and itself wrapped by the HSM master key before it is
//! ever written to storage. The plaintext form must never touch disk.

use zeroize::Zeroize;

use crate::error::KeyError;

/// `true` once a data key is wrapped (ciphertext form); `false` while the
/// bytes are the plaintext key, straight from the RNG or just unwrapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyForm {
    Plaintext,
    Wrapped,
}

/// A data key and the IVs that accompany it through its lifecycle.
///
/// `key_iv` wraps/unwraps `key_bytes` against the HSM master key.
/// `cr_iv` is used by [`crate::cipher`] when `key_bytes` is in plaintext
/// form to encrypt/decrypt the credential payload itself.
#[derive(Clone)]
pub struct DataKey {
    form: KeyForm,
    key_bytes: Vec<u8>,
    key_iv: [u8; 16],
    cr_iv: [u8; 16],
}

impl DataKey {
    /// Generate a fresh plaintext 32-byte AES key with fresh IVs.
    pub fn generate() -> Result<Self, KeyError> {
        let key_bytes = random_bytes(32)?;
        let key_iv = random_iv()?;
        let cr_iv = random_iv()?;
        Ok(Self { form: KeyForm::Plaintext, key_bytes, key_iv, cr_iv })
    }

    /// Reconstruct a data key from stored bytes (wrapped form, as read from
    /// the `data_keys` table) or from a freshly unwrapped plaintext key.
    pub fn from_parts(form: KeyForm, key_bytes: Vec<u8>, key_iv: [u8; 16], cr_iv: [u8; 16]) -> Self {
        Self { form, key_bytes, key_iv, cr_iv }
    }

    pub fn form(&self) -> KeyForm {
        self.form
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    pub fn key_iv(&self) -> [u8; 16] {
        self.key_iv
    }

    pub fn cr_iv(&self) -> [u8; 16] {
        self.cr_iv
    }

    /// Plaintext key as a fixed 32-byte array. Fails if this data key is
    /// still in wrapped form, or the wrap mechanism produced an unexpected
    /// length (would indicate a corrupted or mismatched master key).
    pub fn plaintext_key_array(&self) -> Result<[u8; 32], KeyError> {
        if self.form != KeyForm::Plaintext {
            return Err(KeyError::BadKeyLength(self.key_bytes.len()));
        }
        <[u8; 32]>::try_from(self.key_bytes.as_slice()).map_err(|_| KeyError::BadKeyLength(self.key_bytes.len()))
    }

    pub(crate) fn with_wrapped_bytes(&self, wrapped: Vec<u8>) -> Self {
        Self { form: KeyForm::Wrapped, key_bytes: wrapped, key_iv: self.key_iv, cr_iv: self.cr_iv }
    }

    pub(crate) fn with_plaintext_bytes(&self, plaintext: Vec<u8>) -> Self {
        Self { form: KeyForm::Plaintext, key_bytes: plaintext, key_iv: self.key_iv, cr_iv: self.cr_iv }
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
        self.key_iv.zeroize();
        self.cr_iv.zeroize();
    }
}

fn random_bytes(len: usize) -> Result<Vec<u8>, KeyError> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|_| KeyError::BadKeyLength(len))?;
    Ok(buf)
}

fn random_iv() -> Result<[u8; 16], KeyError> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).map_err(|_| KeyError::BadIvLength(16))?;
    Ok(buf)
}

/// Validate an externally supplied AES key length (16, 24, or 32 bytes).
pub fn validate_key_len(len: usize) -> Result<(), KeyError> {
    match len {
        16 | 24 | 32 => Ok(()),
        other => Err(KeyError::BadKeyLength(other)),
    }
}

/// Validate an externally supplied IV length (8 or 16 bytes).
pub fn validate_iv_len(len: usize) -> Result<(), KeyError> {
    match len {
        8 | 16 => Ok(()),
        other => Err(KeyError::BadIvLength(other)),
    }
}
