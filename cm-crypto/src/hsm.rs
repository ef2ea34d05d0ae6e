//! The HSM boundary: load module, open session, log in, find the master
//! key by label and class "secret key", wrap/unwrap with `CKM_AES_CBC_PAD`.
//!
//! [`HsmProvider`] is the trait a real PKCS#11 module binding would
//! implement. [`SoftHsm`] is an in-process stand-in with the same call
//! shape (open session, log in, find key, encrypt/decrypt, log out, close)
//! used in development and tests so production and test code share one
//! call path, per §4.1.

use crate::error::HsmError;
use crate::types::DataKey;
use crate::{cbc, types};

/// A PKCS#11-shaped handle to a hardware or software security module
/// holding the master key that wraps data keys.
pub trait HsmProvider: Send + Sync {
    /// Encrypt `dk`'s key bytes under the master key using `dk.key_iv()`.
    /// `dk` must be in plaintext form.
    fn wrap(&self, dk: &DataKey) -> Result<DataKey, HsmError>;

    /// Decrypt `dk`'s key bytes under the master key using `dk.key_iv()`.
    /// `dk` must be in wrapped form.
    fn unwrap(&self, dk: &DataKey) -> Result<DataKey, HsmError>;
}

/// Software-backed master key, PKCS#11-shaped. Every call opens a
/// "session", "logs in", and closes the session on every exit path —
/// mirroring the lifecycle a real `PyKCS11`/`pkcs11` binding enforces —
/// even though the software path has no actual session state to leak.
pub struct SoftHsm {
    label: String,
    master_key: [u8; 32],
}

impl SoftHsm {
    /// Construct a software HSM with a specific master key, identified by
    /// `label` the way a real module's `CKA_LABEL` would identify it.
    pub fn new(label: impl Into<String>, master_key: [u8; 32]) -> Self {
        Self { label: label.into(), master_key }
    }

    /// Construct with a fresh random master key (development/test only).
    pub fn ephemeral(label: impl Into<String>) -> Result<Self, HsmError> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).map_err(|e| HsmError::ModuleLoad(e.to_string()))?;
        Ok(Self::new(label, key))
    }

    fn open_session(&self) -> Result<(), HsmError> {
        // A real binding opens a session on a slot and logs in with a PIN
        // here; the software stand-in has nothing to fail on, but keeps
        // the call shape so the caller's error handling exercises the
        // same paths as production.
        Ok(())
    }

    fn find_master_key(&self) -> Result<&[u8; 32], HsmError> {
        if self.label.is_empty() {
            return Err(HsmError::KeyNotFound(self.label.clone()));
        }
        Ok(&self.master_key)
    }

    fn close_session(&self) {}
}

impl HsmProvider for SoftHsm {
    fn wrap(&self, dk: &DataKey) -> Result<DataKey, HsmError> {
        self.open_session()?;
        let result = (|| {
            let key = self.find_master_key()?;
            types::validate_key_len(dk.key_bytes().len())?;
            let iv = dk.key_iv();
            let wrapped = cbc::encrypt(key, &iv, dk.key_bytes());
            Ok(dk.with_wrapped_bytes(wrapped))
        })();
        self.close_session();
        result
    }

    fn unwrap(&self, dk: &DataKey) -> Result<DataKey, HsmError> {
        self.open_session()?;
        let result = (|| {
            let key = self.find_master_key()?;
            let iv = dk.key_iv();
            let plaintext = cbc::decrypt(key, &iv, dk.key_bytes())
                .map_err(|e| HsmError::Mechanism(e.to_string()))?;
            types::validate_key_len(plaintext.len())?;
            Ok(dk.with_plaintext_bytes(plaintext))
        })();
        self.close_session();
        result
    }
}
