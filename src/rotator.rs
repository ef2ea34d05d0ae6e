//! Live password rotation state machine (§4.5, §9).
//!
//! Modeled as a sum-typed `Result<Stage, RotationError>` per stage rather
//! than raised-and-caught exceptions, so the critical-path rule in §7 —
//! "if S2 succeeds but S3 fails, alert and leave local state untouched" —
//! is enforced by the type the caller is handed back, not by a try/except
//! that's easy to get wrong.

use core::fmt;

use async_trait::async_trait;
use rand::RngCore;

use cm_crypto::{cipher, DataKey, HsmProvider};
use cm_store::Store;

/// Named stages of §4.5's state diagram. `Start`/`PasswordChosen` are
/// folded into the caller of [`rotate`]; everything [`rotate`] can
/// actually return starts at `RemoteSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RemoteSet,
    RemoteVerified,
    LocalCommitted,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// A caller-supplied password failed the length/charset check (S0→S1).
    PasswordTooShort,
    /// S1→S2: changing the password on the live target DB failed. Stored
    /// credential is untouched; the system remains consistent.
    RemoteSetFailed(String),
    /// S2→S3: the new password was rejected on reconnect. The remote
    /// password WAS changed; CM cannot prove the new credential works.
    /// This is the unsafe window (§7) — callers MUST log
    /// `ROTATION_UNVERIFIED` and must not touch local storage.
    VerifyFailed(String),
    /// S3→S4: local re-encryption or the atomic store update failed,
    /// after the remote password was already verified. Rare and serious:
    /// the live DB and the stored record now disagree.
    CommitFailed(String),
}

impl fmt::Display for RotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationError::PasswordTooShort => write!(f, "generated or supplied password is too short"),
            RotationError::RemoteSetFailed(msg) => write!(f, "remote password change failed: {}", msg),
            RotationError::VerifyFailed(msg) => write!(f, "could not verify new password on target: {}", msg),
            RotationError::CommitFailed(msg) => write!(f, "local commit failed after remote verification: {}", msg),
        }
    }
}

impl std::error::Error for RotationError {}

/// A stored credential's connection parameters, decrypted and ready to
/// hand to a [`TargetDbAdapter`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Abstracts the driver-specific password-change statement (§9): the
/// reference hardcodes MySQL/MariaDB's `SET PASSWORD = PASSWORD(%s)`;
/// other backends plug in by implementing this trait instead.
#[async_trait]
pub trait TargetDbAdapter: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<(), String>;
    async fn change_password(&self, params: &ConnectionParams, new_password: &str) -> Result<(), String>;
}

const PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+-=[]|";
const MIN_PASSWORD_LEN: usize = 12;

/// Generates a password of at least [`MIN_PASSWORD_LEN`] characters over
/// [`PASSWORD_CHARSET`] by rejection sampling raw random bytes (§4.5
/// S0→S1): a byte is kept only if it falls within the charset's range,
/// so the distribution over characters stays uniform.
fn generate_password(len: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 1];
    while out.len() < len {
        rng.fill_bytes(&mut buf);
        let candidate = buf[0] as usize % 256;
        if candidate < PASSWORD_CHARSET.len() * 3 {
            let idx = candidate % PASSWORD_CHARSET.len();
            out.push(PASSWORD_CHARSET[idx] as char);
        }
    }
    out
}

/// Fetches and decrypts the connection parameters stored for `label`
/// (§6 `TEST CONNECTION`): the same lookup [`rotate`] performs before it
/// touches anything remote, split out so a caller can just dial the
/// target without changing its password.
pub async fn fetch_connection_params(store: &dyn Store, hsm: &dyn HsmProvider, label: &str) -> Result<ConnectionParams, String> {
    let credential_row = store.fetch_credential(label).await.map_err(|e| e.to_string())?.ok_or("no such credential")?;
    let data_key_row = store
        .fetch_data_key(credential_row.cr_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("credential row has no matching data_key row")?;

    let wrapped = DataKey::from_parts(
        cm_crypto::KeyForm::Wrapped,
        data_key_row.wrapped_key,
        array16(&data_key_row.key_iv).ok_or("bad key_iv length")?,
        array16(&data_key_row.cr_iv).ok_or("bad cr_iv length")?,
    );
    let plaintext_dk = hsm.unwrap(&wrapped).map_err(|e| e.to_string())?;
    cipher::decrypt(&plaintext_dk, &credential_row.ciphertext).map_err(|e| e.to_string())
}

/// Drives the full S0→S5 pipeline for `label` against `adapter`. Returns
/// `Ok(Stage::Done)` only once the remote password is verified AND the
/// local record is committed. Every failure path carries the stage it
/// failed at via [`RotationError`]'s variant.
pub async fn rotate(
    store: &dyn Store,
    hsm: &dyn HsmProvider,
    audit: &dyn cm_store::AuditSinkSync,
    adapter: &dyn TargetDbAdapter,
    label: &str,
    requested_password: Option<String>,
) -> Result<Stage, RotationError> {
    // S0 -> S1: choose the new password.
    let new_password = match requested_password {
        Some(p) if p.len() >= MIN_PASSWORD_LEN => p,
        Some(_) => return Err(RotationError::PasswordTooShort),
        None => generate_password(16),
    };

    let credential_row = store
        .fetch_credential(label)
        .await
        .map_err(|e| RotationError::RemoteSetFailed(e.to_string()))?
        .ok_or_else(|| RotationError::RemoteSetFailed("no such credential".into()))?;
    let mut old_params = fetch_connection_params(store, hsm, label).await.map_err(RotationError::RemoteSetFailed)?;

    // S1 -> S2: connect with the OLD password, change it on the target.
    adapter.connect(&old_params).await.map_err(RotationError::RemoteSetFailed)?;
    adapter.change_password(&old_params, &new_password).await.map_err(RotationError::RemoteSetFailed)?;

    audit.record(cm_store::AuditEvent::credential_event(
        credential_row.cr_id,
        label,
        cm_store::AuditAction::RotationStageEntered { stage: "RemoteSet".into() },
    ));

    // S2 -> S3: the new password must work. This is the acceptance test.
    let mut new_params = old_params.clone();
    new_params.password = new_password.clone();
    if let Err(e) = adapter.connect(&new_params).await {
        audit.record(
            cm_store::AuditEvent::credential_event(credential_row.cr_id, label, cm_store::AuditAction::RotationUnverified {
                reason: e.clone(),
            })
            .with_failure(),
        );
        return Err(RotationError::VerifyFailed(e));
    }

    audit.record(cm_store::AuditEvent::credential_event(
        credential_row.cr_id,
        label,
        cm_store::AuditAction::RotationStageEntered { stage: "RemoteVerified".into() },
    ));

    // S3 -> S4: fresh data key, re-encrypt, wrap, commit atomically.
    old_params.password.clear(); // zeroize-by-clear before it drops; the old secret has no further use.
    let fresh_dk = DataKey::generate().map_err(|e| RotationError::CommitFailed(e.to_string()))?;
    let new_ciphertext = cipher::encrypt(&fresh_dk, &new_params).map_err(|e| RotationError::CommitFailed(e.to_string()))?;
    let wrapped_fresh = hsm.wrap(&fresh_dk).map_err(|e| RotationError::CommitFailed(e.to_string()))?;

    store
        .update_credential_and_key(
            label,
            new_ciphertext,
            wrapped_fresh.key_bytes().to_vec(),
            wrapped_fresh.key_iv().to_vec(),
            wrapped_fresh.cr_iv().to_vec(),
        )
        .await
        .map_err(|e| RotationError::CommitFailed(e.to_string()))?;

    audit.record(cm_store::AuditEvent::credential_event(
        credential_row.cr_id,
        label,
        cm_store::AuditAction::RotationStageEntered { stage: "LocalCommitted".into() },
    ));

    Ok(Stage::Done)
}

fn array16(bytes: &[u8]) -> Option<[u8; 16]> {
    <[u8; 16]>::try_from(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_crypto::SoftHsm;
    use cm_store::InMemoryBackend;
    use std::sync::Mutex;

    struct FakeAdapter {
        verify_fails: bool,
        connects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TargetDbAdapter for FakeAdapter {
        async fn connect(&self, params: &ConnectionParams) -> Result<(), String> {
            self.connects.lock().unwrap().push(params.password.clone());
            if self.verify_fails && self.connects.lock().unwrap().len() > 1 {
                return Err("connection refused".into());
            }
            Ok(())
        }

        async fn change_password(&self, _params: &ConnectionParams, _new_password: &str) -> Result<(), String> {
            Ok(())
        }
    }

    async fn seeded(password: &str) -> (InMemoryBackend, SoftHsm) {
        let hsm = SoftHsm::ephemeral("cm-master").unwrap();
        let store = InMemoryBackend::new();
        let dk = DataKey::generate().unwrap();
        let params = ConnectionParams { host: "db".into(), user: "w".into(), password: password.into(), database: "d".into(), port: None };
        let ciphertext = cipher::encrypt(&dk, &params).unwrap();
        let wrapped = hsm.wrap(&dk).unwrap();
        let cr_id = store.put_credential("web", ciphertext).await.unwrap();
        store.put_data_key(cr_id, wrapped.key_bytes().to_vec(), wrapped.key_iv().to_vec(), wrapped.cr_iv().to_vec()).await.unwrap();
        (store, hsm)
    }

    #[tokio::test]
    async fn s5_rotate_happy_path() {
        let (store, hsm) = seeded("old-password").await;
        let audit = cm_store::InMemoryAuditSink::new();
        let adapter = FakeAdapter { verify_fails: false, connects: Mutex::new(vec![]) };

        let result = rotate(&store, &hsm, &audit, &adapter, "web", Some("a-new-long-password".into())).await;
        assert_eq!(result.unwrap(), Stage::Done);

        let credential_row = store.fetch_credential("web").await.unwrap().unwrap();
        let data_key_row = store.fetch_data_key(credential_row.cr_id).await.unwrap().unwrap();
        let plaintext_dk = hsm
            .unwrap(&DataKey::from_parts(
                cm_crypto::KeyForm::Wrapped,
                data_key_row.wrapped_key,
                array16(&data_key_row.key_iv).unwrap(),
                array16(&data_key_row.cr_iv).unwrap(),
            ))
            .unwrap();
        let params: ConnectionParams = cipher::decrypt(&plaintext_dk, &credential_row.ciphertext).unwrap();
        assert_eq!(params.password, "a-new-long-password");
    }

    #[tokio::test]
    async fn s6_verify_fail_leaves_local_state_untouched() {
        let (store, hsm) = seeded("old-password").await;
        let audit = cm_store::InMemoryAuditSink::new();
        let adapter = FakeAdapter { verify_fails: true, connects: Mutex::new(vec![]) };

        let result = rotate(&store, &hsm, &audit, &adapter, "web", Some("a-new-long-password".into())).await;
        assert!(matches!(result, Err(RotationError::VerifyFailed(_))));

        let credential_row = store.fetch_credential("web").await.unwrap().unwrap();
        let data_key_row = store.fetch_data_key(credential_row.cr_id).await.unwrap().unwrap();
        let plaintext_dk = hsm
            .unwrap(&DataKey::from_parts(
                cm_crypto::KeyForm::Wrapped,
                data_key_row.wrapped_key,
                array16(&data_key_row.key_iv).unwrap(),
                array16(&data_key_row.cr_iv).unwrap(),
            ))
            .unwrap();
        let params: ConnectionParams = cipher::decrypt(&plaintext_dk, &credential_row.ciphertext).unwrap();
        assert_eq!(params.password, "old-password");

        let events = audit.events().await;
        assert!(events.iter().any(|e| matches!(e.action, cm_store::AuditAction::RotationUnverified { .. })));
    }

    #[tokio::test]
    async fn short_password_rejected_before_any_remote_call() {
        let (store, hsm) = seeded("old-password").await;
        let audit = cm_store::InMemoryAuditSink::new();
        let adapter = FakeAdapter { verify_fails: false, connects: Mutex::new(vec![]) };

        let result = rotate(&store, &hsm, &audit, &adapter, "web", Some("short".into())).await;
        assert_eq!(result.unwrap_err(), RotationError::PasswordTooShort);
        assert!(adapter.connects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_connection_params_decrypts_stored_credential() {
        let (store, hsm) = seeded("old-password").await;
        let params = fetch_connection_params(&store, &hsm, "web").await.unwrap();
        assert_eq!(params.password, "old-password");
        assert_eq!(params.host, "db");
    }

    #[tokio::test]
    async fn fetch_connection_params_missing_label_is_an_error() {
        let (store, hsm) = seeded("old-password").await;
        let result = fetch_connection_params(&store, &hsm, "ghost").await;
        assert!(result.is_err());
    }

    #[test]
    fn generated_password_meets_length_and_charset() {
        let password = generate_password(16);
        assert_eq!(password.len(), 16);
        assert!(password.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));
    }
}
