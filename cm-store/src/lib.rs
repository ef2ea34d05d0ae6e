//! Persistence and invariants for Credentials Manager users, credentials,
//! data keys, and permissions (§4.3).
//!
//! [`backend::Store`] is the trait the protocol and rotation layers code
//! against; [`backend::memory::InMemoryBackend`] backs tests and
//! [`mysql::MySqlBackend`] backs production deployments against the
//! schema in §6.

pub mod audit;
pub mod backend;
pub mod error;
pub mod mysql;
pub mod types;

pub use audit::{AuditAction, AuditEvent, AuditSinkSync, FileAuditSink, InMemoryAuditSink, IntegrityChainSink, TracingAuditSink};
pub use backend::memory::InMemoryBackend;
pub use backend::Store;
pub use error::StoreError;
pub use mysql::MySqlBackend;
pub use types::{CrId, CredentialRow, DataKeyRow, PermissionRow, Uid, UserRow, UserSummary};

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_wrapped_key() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (vec![0xAB; 48], vec![0x01; 16], vec![0x02; 16])
    }

    #[tokio::test]
    async fn put_and_fetch_user() {
        let store = InMemoryBackend::new();
        let uid = store.put_user("alice", vec![1, 2, 3], vec![4, 5, 6]).await.unwrap();
        let fetched = store.fetch_user("alice").await.unwrap().unwrap();
        assert_eq!(fetched.uid, uid);
        assert_eq!(fetched.username, "alice");
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let store = InMemoryBackend::new();
        store.put_user("alice", vec![], vec![]).await.unwrap();
        let result = store.put_user("alice", vec![], vec![]).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[tokio::test]
    async fn delete_missing_user_is_not_found() {
        let store = InMemoryBackend::new();
        let result = store.delete_user("ghost").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn list_users_truncates_hash_for_display() {
        let store = InMemoryBackend::new();
        store.put_user("alice", vec![1], vec![0xAA; 60]).await.unwrap();
        let summaries = store.list_users().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].hash_prefix.len(), 16);
    }

    #[tokio::test]
    async fn credential_and_data_key_round_trip() {
        let store = InMemoryBackend::new();
        let cr_id = store.put_credential("db/prod", vec![0xFF; 32]).await.unwrap();
        let (wrapped, key_iv, cr_iv) = sample_wrapped_key();
        store.put_data_key(cr_id, wrapped.clone(), key_iv.clone(), cr_iv.clone()).await.unwrap();

        let credential = store.fetch_credential("db/prod").await.unwrap().unwrap();
        assert_eq!(credential.cr_id, cr_id);
        let data_key = store.fetch_data_key(cr_id).await.unwrap().unwrap();
        assert_eq!(data_key.wrapped_key, wrapped);
    }

    #[tokio::test]
    async fn data_key_requires_existing_credential() {
        let store = InMemoryBackend::new();
        let (wrapped, key_iv, cr_iv) = sample_wrapped_key();
        let result = store.put_data_key(CrId(99), wrapped, key_iv, cr_iv).await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn delete_credential_cascades_to_data_key_and_permissions() {
        let store = InMemoryBackend::new();
        let cr_id = store.put_credential("db/prod", vec![1]).await.unwrap();
        let (wrapped, key_iv, cr_iv) = sample_wrapped_key();
        store.put_data_key(cr_id, wrapped, key_iv, cr_iv).await.unwrap();
        let uid = store.put_user("alice", vec![], vec![]).await.unwrap();
        store.put_permission(uid, cr_id).await.unwrap();

        store.delete_credential("db/prod").await.unwrap();

        assert!(store.fetch_credential("db/prod").await.unwrap().is_none());
        assert!(store.fetch_data_key(cr_id).await.unwrap().is_none());
        assert!(!store.has_permission(uid, cr_id).await.unwrap());
    }

    #[tokio::test]
    async fn permission_grant_check_revoke() {
        let store = InMemoryBackend::new();
        let uid = store.put_user("alice", vec![], vec![]).await.unwrap();
        let cr_id = store.put_credential("db/prod", vec![1]).await.unwrap();

        assert!(!store.has_permission(uid, cr_id).await.unwrap());
        store.put_permission(uid, cr_id).await.unwrap();
        assert!(store.has_permission(uid, cr_id).await.unwrap());

        store.delete_permission(uid, cr_id).await.unwrap();
        assert!(!store.has_permission(uid, cr_id).await.unwrap());
    }

    #[tokio::test]
    async fn revoking_ungranted_permission_is_not_found() {
        let store = InMemoryBackend::new();
        let uid = store.put_user("alice", vec![], vec![]).await.unwrap();
        let cr_id = store.put_credential("db/prod", vec![1]).await.unwrap();
        let result = store.delete_permission(uid, cr_id).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn duplicate_permission_grant_rejected() {
        let store = InMemoryBackend::new();
        let uid = store.put_user("alice", vec![], vec![]).await.unwrap();
        let cr_id = store.put_credential("db/prod", vec![1]).await.unwrap();
        store.put_permission(uid, cr_id).await.unwrap();
        let result = store.put_permission(uid, cr_id).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[tokio::test]
    async fn update_credential_and_key_replaces_both_atomically() {
        let store = InMemoryBackend::new();
        let cr_id = store.put_credential("db/prod", vec![1]).await.unwrap();
        let (wrapped, key_iv, cr_iv) = sample_wrapped_key();
        store.put_data_key(cr_id, wrapped, key_iv, cr_iv).await.unwrap();

        store
            .update_credential_and_key("db/prod", vec![2, 2, 2], vec![0xCD; 48], vec![0x03; 16], vec![0x04; 16])
            .await
            .unwrap();

        let credential = store.fetch_credential("db/prod").await.unwrap().unwrap();
        assert_eq!(credential.ciphertext, vec![2, 2, 2]);
        let data_key = store.fetch_data_key(cr_id).await.unwrap().unwrap();
        assert_eq!(data_key.wrapped_key, vec![0xCD; 48]);
    }

    #[tokio::test]
    async fn update_missing_credential_is_not_found() {
        let store = InMemoryBackend::new();
        let result = store.update_credential_and_key("ghost", vec![], vec![], vec![], vec![]).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn update_data_key_replaces_wrapped_key_only() {
        let store = InMemoryBackend::new();
        let cr_id = store.put_credential("db/prod", vec![9, 9]).await.unwrap();
        let (wrapped, key_iv, cr_iv) = sample_wrapped_key();
        store.put_data_key(cr_id, wrapped, key_iv, cr_iv.clone()).await.unwrap();

        store.update_data_key(cr_id, vec![0xEE; 48], vec![0x07; 16]).await.unwrap();

        let data_key = store.fetch_data_key(cr_id).await.unwrap().unwrap();
        assert_eq!(data_key.wrapped_key, vec![0xEE; 48]);
        assert_eq!(data_key.key_iv, vec![0x07; 16]);
        assert_eq!(data_key.cr_iv, cr_iv);
        let credential = store.fetch_credential("db/prod").await.unwrap().unwrap();
        assert_eq!(credential.ciphertext, vec![9, 9]);
    }

    #[tokio::test]
    async fn update_data_key_missing_row_is_not_found() {
        let store = InMemoryBackend::new();
        let result = store.update_data_key(CrId(404), vec![], vec![]).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
