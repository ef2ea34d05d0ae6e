//! AES-CBC with PKCS7 padding — the `CKM_AES_CBC_PAD` mechanism.
//!
//! Used both by the HSM wrap/unwrap path (§4.1) and by the legacy
//! (format byte `0x01`) on-disk credential cipher (§4.2, §9).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CipherError;

type Enc = cbc::Encryptor<aes::Aes256>;
type Dec = cbc::Decryptor<aes::Aes256>;

/// Encrypt `plaintext` under `key` (32 bytes) and `iv` (16 bytes) with
/// PKCS7 padding to the 128-bit block size.
pub fn encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Enc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt `ciphertext` under `key` and `iv`, validating PKCS7 padding.
pub fn decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CipherError::Length);
    }
    Dec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Padding)
}
