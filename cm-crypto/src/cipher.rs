//! Credential ciphertext: encrypt/decrypt the `{host,user,password,...}`
//! JSON object under a data key.
//!
//! On-disk format is a single leading version byte followed by the
//! mechanism-specific body, so old records stay decryptable after the
//! default mechanism changes (§9):
//!
//! - `0x01` — legacy: AES-CBC + PKCS7 over canonical JSON, using `cr_iv`.
//! - `0x02` — current: AES-256-GCM over canonical JSON, 12-byte nonce
//!   stored in place of the CBC IV (first 12 bytes of the body), tag
//!   appended by the AEAD crate.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CipherError;
use crate::types::DataKey;
use crate::{cbc, types};

const FORMAT_CBC_LEGACY: u8 = 0x01;
const FORMAT_AES_GCM: u8 = 0x02;

/// Encrypt a JSON-serializable credential payload under `dk`'s plaintext
/// key, using the current on-disk format (`0x02`, AES-256-GCM).
pub fn encrypt<T: Serialize>(dk: &DataKey, payload: &T) -> Result<Vec<u8>, CipherError> {
    let json = serde_json::to_vec(payload).map_err(|e| CipherError::Encoding(e.to_string()))?;
    let key = dk.plaintext_key_array().map_err(|e| CipherError::Encoding(e.to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CipherError::Encoding(e.to_string()))?;
    let nonce_bytes = &dk.cr_iv()[..12];
    let nonce = Nonce::from_slice(nonce_bytes);
    let body = cipher
        .encrypt(nonce, Payload { msg: &json, aad: &[] })
        .map_err(|_| CipherError::Authentication)?;

    let mut out = Vec::with_capacity(1 + body.len());
    out.push(FORMAT_AES_GCM);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt a credential payload previously produced by [`encrypt`] or by
/// the legacy CBC path, dispatching on the leading format byte.
pub fn decrypt<T: DeserializeOwned>(dk: &DataKey, ciphertext: &[u8]) -> Result<T, CipherError> {
    let (&format, body) = ciphertext.split_first().ok_or(CipherError::Length)?;
    let json = match format {
        FORMAT_CBC_LEGACY => {
            let key = dk.plaintext_key_array().map_err(|_| CipherError::Length)?;
            cbc::decrypt(&key, &dk.cr_iv(), body)?
        }
        FORMAT_AES_GCM => {
            let key = dk.plaintext_key_array().map_err(|_| CipherError::Length)?;
            let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::Length)?;
            let nonce_bytes = &dk.cr_iv()[..12];
            let nonce = Nonce::from_slice(nonce_bytes);
            cipher
                .decrypt(nonce, Payload { msg: body, aad: &[] })
                .map_err(|_| CipherError::Authentication)?
        }
        other => return Err(CipherError::UnknownFormat(other)),
    };
    serde_json::from_slice(&json).map_err(|e| CipherError::Encoding(e.to_string()))
}

/// Encrypt with the legacy `0x01` CBC format explicitly. Exists only so
/// migration tests and fixtures can construct pre-upgrade records; new
/// writes always use [`encrypt`].
pub fn encrypt_legacy_cbc<T: Serialize>(dk: &DataKey, payload: &T) -> Result<Vec<u8>, CipherError> {
    let json = serde_json::to_vec(payload).map_err(|e| CipherError::Encoding(e.to_string()))?;
    let key = dk.plaintext_key_array().map_err(|e| CipherError::Encoding(e.to_string()))?;
    let body = cbc::encrypt(&key, &dk.cr_iv(), &json);
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(FORMAT_CBC_LEGACY);
    out.extend_from_slice(&body);
    Ok(out)
}

pub use types::{validate_iv_len, validate_key_len};
