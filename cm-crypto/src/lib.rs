//! Envelope-encryption primitives for the Credentials Manager.
//!
//! Two levels, leaves first:
//!
//! - [`hsm`] wraps and unwraps a per-credential [`types::DataKey`] under an
//!   HSM-resident master key (`CKM_AES_CBC_PAD`).
//! - [`cipher`] encrypts and decrypts the credential JSON payload itself
//!   under the unwrapped data key.
//!
//! [`password`] is the unrelated but equally foundational bcrypt-class
//! hashing used by user authentication (§4.4).

pub mod cbc;
pub mod cipher;
pub mod error;
pub mod hsm;
pub mod password;
pub mod types;

pub use error::{CipherError, HsmError, KeyError};
pub use hsm::{HsmProvider, SoftHsm};
pub use types::{DataKey, KeyForm};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Credential {
        host: String,
        user: String,
        password: String,
        database: String,
    }

    fn sample() -> Credential {
        Credential {
            host: "db.internal".into(),
            user: "w".into(),
            password: "p0".into(),
            database: "d".into(),
        }
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let hsm = SoftHsm::ephemeral("cm-master").unwrap();
        let dk = DataKey::generate().unwrap();
        let plaintext_key = dk.key_bytes().to_vec();

        let wrapped = hsm.wrap(&dk).unwrap();
        assert_eq!(wrapped.form(), KeyForm::Wrapped);
        assert_ne!(wrapped.key_bytes(), plaintext_key.as_slice());

        let unwrapped = hsm.unwrap(&wrapped).unwrap();
        assert_eq!(unwrapped.form(), KeyForm::Plaintext);
        assert_eq!(unwrapped.key_bytes(), plaintext_key.as_slice());
    }

    #[test]
    fn wrap_unwrap_fails_with_wrong_master_key() {
        let hsm_a = SoftHsm::new("cm-master", [1u8; 32]);
        let hsm_b = SoftHsm::new("cm-master", [2u8; 32]);
        let dk = DataKey::generate().unwrap();

        let wrapped = hsm_a.wrap(&dk).unwrap();
        let result = hsm_b.unwrap(&wrapped);
        assert!(result.is_err());
    }

    #[test]
    fn cipher_round_trip_current_format() {
        let dk = DataKey::generate().unwrap();
        let ciphertext = cipher::encrypt(&dk, &sample()).unwrap();
        let decrypted: Credential = cipher::decrypt(&dk, &ciphertext).unwrap();
        assert_eq!(decrypted, sample());
    }

    #[test]
    fn cipher_round_trip_legacy_format() {
        let dk = DataKey::generate().unwrap();
        let ciphertext = cipher::encrypt_legacy_cbc(&dk, &sample()).unwrap();
        assert_eq!(ciphertext[0], 0x01);
        let decrypted: Credential = cipher::decrypt(&dk, &ciphertext).unwrap();
        assert_eq!(decrypted, sample());
    }

    #[test]
    fn cipher_rejects_unknown_format_byte() {
        let dk = DataKey::generate().unwrap();
        let mut ciphertext = cipher::encrypt(&dk, &sample()).unwrap();
        ciphertext[0] = 0xFF;
        let result: Result<Credential, _> = cipher::decrypt(&dk, &ciphertext);
        assert_eq!(result.unwrap_err(), CipherError::UnknownFormat(0xFF));
    }

    #[test]
    fn cipher_fails_with_wrong_key() {
        let dk1 = DataKey::generate().unwrap();
        let dk2 = DataKey::generate().unwrap();
        let ciphertext = cipher::encrypt(&dk1, &sample()).unwrap();
        let result: Result<Credential, _> = cipher::decrypt(&dk2, &ciphertext);
        assert!(result.is_err());
    }

    #[test]
    fn password_hash_verifies_with_known_salt() {
        let hashed = password::hash_and_salt("hunter2").unwrap();
        let recomputed = password::hash_with_known_salt("hunter2", hashed.salt).unwrap();
        assert!(password::hashes_match(&recomputed, &hashed.hash));
    }

    #[test]
    fn password_hash_rejects_wrong_password() {
        let hashed = password::hash_and_salt("hunter2").unwrap();
        let recomputed = password::hash_with_known_salt("wrong", hashed.salt).unwrap();
        assert!(!password::hashes_match(&recomputed, &hashed.hash));
    }

    #[test]
    fn key_length_validation() {
        assert!(types::validate_key_len(32).is_ok());
        assert!(types::validate_key_len(20).is_err());
        assert!(types::validate_iv_len(16).is_ok());
        assert!(types::validate_iv_len(12).is_err());
    }
}
