//! Password authentication and per-credential authorization (§4.4).

use cm_crypto::password;
use cm_store::Store;

use crate::error::AuthError;

/// Fetches `(salt, stored_hash)` for `username`, recomputes the
/// bcrypt-class hash of `password` with that salt, and compares in
/// constant time. A missing user still performs a dummy hash so the
/// wall-clock cost is indistinguishable from a real lookup (§8 property 6).
pub async fn authenticate(store: &dyn Store, username: &str, password_attempt: &str) -> Result<(), AuthError> {
    match store.fetch_user(username).await {
        Ok(Some(user)) => {
            let computed = password::hash_with_known_salt(password_attempt, user.salt.clone().try_into().unwrap_or([0u8; 16]))
                .map_err(|_| AuthError)?;
            let stored = String::from_utf8(user.password_hash.clone()).map_err(|_| AuthError)?;
            if password::hashes_match(&computed, &stored) {
                Ok(())
            } else {
                Err(AuthError)
            }
        }
        _ => {
            let _ = password::dummy_hash_for_timing_equalization(password_attempt);
            Err(AuthError)
        }
    }
}

/// Resolves `uid` and `cr_id` for `username`/`label` and checks the
/// permission table. An absent user or absent label returns `false`
/// without revealing which was missing.
pub async fn authorize(store: &dyn Store, username: &str, label: &str) -> Result<bool, AuthError> {
    let uid = match store.fetch_user(username).await {
        Ok(Some(user)) => user.uid,
        _ => return Ok(false),
    };
    let cr_id = match store.fetch_credential(label).await {
        Ok(Some(credential)) => credential.cr_id,
        _ => return Ok(false),
    };
    store.has_permission(uid, cr_id).await.map_err(|_| AuthError)
}
