//! The `Store` trait (§4.3): typed operations over the four entities,
//! each taking an ambient connection handle obtained from a pool.
//!
//! [`InMemoryBackend`] is the fixture used by rotation-pipeline and
//! protocol-layer tests; [`crate::mysql::MySqlBackend`] is the production
//! implementation against the relational schema in §6.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{CrId, CredentialRow, DataKeyRow, PermissionRow, Uid, UserRow, UserSummary};

/// Persistence and invariants for users, credentials, data keys, and
/// permissions. All methods are `Send + Sync` so a single store can be
/// shared behind an `Arc` across connection handlers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_user(&self, username: &str, salt: Vec<u8>, hash: Vec<u8>) -> Result<Uid, StoreError>;
    async fn delete_user(&self, username: &str) -> Result<(), StoreError>;
    async fn fetch_user(&self, username: &str) -> Result<Option<UserRow>, StoreError>;
    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError>;

    async fn put_credential(&self, label: &str, ciphertext: Vec<u8>) -> Result<CrId, StoreError>;
    async fn delete_credential(&self, label: &str) -> Result<(), StoreError>;
    async fn fetch_credential(&self, label: &str) -> Result<Option<CredentialRow>, StoreError>;
    async fn list_credentials(&self) -> Result<Vec<CredentialRow>, StoreError>;

    async fn put_data_key(&self, cr_id: CrId, wrapped: Vec<u8>, key_iv: Vec<u8>, cr_iv: Vec<u8>) -> Result<(), StoreError>;
    async fn fetch_data_key(&self, cr_id: CrId) -> Result<Option<DataKeyRow>, StoreError>;

    /// Replaces the wrapped key material for an existing data key row
    /// without touching the credential ciphertext it belongs to — used
    /// when the HSM master key itself is rotated and every data key must
    /// be unwrapped under the old master key and rewrapped under the new
    /// one (§4.3). Does not exist for re-encrypting the credential; that
    /// goes through [`Store::update_credential_and_key`] instead.
    async fn update_data_key(&self, cr_id: CrId, new_wrapped_key: Vec<u8>, new_key_iv: Vec<u8>) -> Result<(), StoreError>;

    async fn put_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError>;
    async fn delete_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError>;
    async fn has_permission(&self, uid: Uid, cr_id: CrId) -> Result<bool, StoreError>;
    async fn list_permissions(&self) -> Result<Vec<PermissionRow>, StoreError>;

    /// Updates the credential ciphertext and its data key together as one
    /// transaction (§4.3, §4.5 S3→S4). Partial application would violate
    /// the one-to-one invariant between `credentials` and `data_keys`.
    async fn update_credential_and_key(
        &self,
        label: &str,
        new_ciphertext: Vec<u8>,
        new_wrapped_key: Vec<u8>,
        new_key_iv: Vec<u8>,
        new_cr_iv: Vec<u8>,
    ) -> Result<(), StoreError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    struct Tables {
        users: HashMap<String, UserRow>,
        credentials: HashMap<String, CredentialRow>,
        data_keys: HashMap<i64, DataKeyRow>,
        permissions: Vec<PermissionRow>,
    }

    /// A backend that holds every table in memory behind one lock.
    /// Matches the reference's single-database semantics closely enough
    /// for deterministic tests (no partial-failure simulation needed
    /// beyond what callers inject themselves).
    pub struct InMemoryBackend {
        tables: Arc<RwLock<Tables>>,
        next_uid: AtomicI64,
        next_cr_id: AtomicI64,
        next_perm_id: AtomicI64,
    }

    impl InMemoryBackend {
        pub fn new() -> Self {
            Self {
                tables: Arc::new(RwLock::new(Tables::default())),
                next_uid: AtomicI64::new(1),
                next_cr_id: AtomicI64::new(1),
                next_perm_id: AtomicI64::new(1),
            }
        }
    }

    impl Default for InMemoryBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Store for InMemoryBackend {
        async fn put_user(&self, username: &str, salt: Vec<u8>, hash: Vec<u8>) -> Result<Uid, StoreError> {
            let mut tables = self.tables.write().await;
            if tables.users.contains_key(username) {
                return Err(StoreError::AlreadyExists);
            }
            let uid = Uid(self.next_uid.fetch_add(1, Ordering::SeqCst));
            tables.users.insert(
                username.to_string(),
                UserRow { uid, username: username.to_string(), salt, password_hash: hash },
            );
            Ok(uid)
        }

        async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            tables.users.remove(username).ok_or(StoreError::NotFound)?;
            Ok(())
        }

        async fn fetch_user(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
            Ok(self.tables.read().await.users.get(username).cloned())
        }

        async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
            Ok(self
                .tables
                .read()
                .await
                .users
                .values()
                .map(|u| UserSummary {
                    uid: u.uid,
                    username: u.username.clone(),
                    hash_prefix: hex::encode(&u.password_hash).chars().take(16).collect(),
                })
                .collect())
        }

        async fn put_credential(&self, label: &str, ciphertext: Vec<u8>) -> Result<CrId, StoreError> {
            let mut tables = self.tables.write().await;
            if tables.credentials.contains_key(label) {
                return Err(StoreError::AlreadyExists);
            }
            let cr_id = CrId(self.next_cr_id.fetch_add(1, Ordering::SeqCst));
            tables
                .credentials
                .insert(label.to_string(), CredentialRow { cr_id, label: label.to_string(), ciphertext });
            Ok(cr_id)
        }

        async fn delete_credential(&self, label: &str) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            let row = tables.credentials.remove(label).ok_or(StoreError::NotFound)?;
            tables.data_keys.remove(&row.cr_id.0);
            tables.permissions.retain(|p| p.cr_id != row.cr_id);
            Ok(())
        }

        async fn fetch_credential(&self, label: &str) -> Result<Option<CredentialRow>, StoreError> {
            Ok(self.tables.read().await.credentials.get(label).cloned())
        }

        async fn list_credentials(&self) -> Result<Vec<CredentialRow>, StoreError> {
            Ok(self.tables.read().await.credentials.values().cloned().collect())
        }

        async fn put_data_key(&self, cr_id: CrId, wrapped: Vec<u8>, key_iv: Vec<u8>, cr_iv: Vec<u8>) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            if !tables.credentials.values().any(|c| c.cr_id == cr_id) {
                return Err(StoreError::Integrity("no credential row for cr_id".into()));
            }
            if tables.data_keys.contains_key(&cr_id.0) {
                return Err(StoreError::AlreadyExists);
            }
            tables.data_keys.insert(cr_id.0, DataKeyRow { cr_id, wrapped_key: wrapped, key_iv, cr_iv });
            Ok(())
        }

        async fn fetch_data_key(&self, cr_id: CrId) -> Result<Option<DataKeyRow>, StoreError> {
            Ok(self.tables.read().await.data_keys.get(&cr_id.0).cloned())
        }

        async fn update_data_key(&self, cr_id: CrId, new_wrapped_key: Vec<u8>, new_key_iv: Vec<u8>) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            let row = tables.data_keys.get_mut(&cr_id.0).ok_or(StoreError::NotFound)?;
            row.wrapped_key = new_wrapped_key;
            row.key_iv = new_key_iv;
            Ok(())
        }

        async fn put_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            if tables.permissions.iter().any(|p| p.uid == uid && p.cr_id == cr_id) {
                return Err(StoreError::AlreadyExists);
            }
            let perm_id = self.next_perm_id.fetch_add(1, Ordering::SeqCst);
            tables.permissions.push(PermissionRow { perm_id, uid, cr_id });
            Ok(())
        }

        async fn delete_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            let before = tables.permissions.len();
            tables.permissions.retain(|p| !(p.uid == uid && p.cr_id == cr_id));
            if tables.permissions.len() == before {
                return Err(StoreError::NotFound);
            }
            Ok(())
        }

        async fn has_permission(&self, uid: Uid, cr_id: CrId) -> Result<bool, StoreError> {
            Ok(self.tables.read().await.permissions.iter().any(|p| p.uid == uid && p.cr_id == cr_id))
        }

        async fn list_permissions(&self) -> Result<Vec<PermissionRow>, StoreError> {
            Ok(self.tables.read().await.permissions.clone())
        }

        async fn update_credential_and_key(
            &self,
            label: &str,
            new_ciphertext: Vec<u8>,
            new_wrapped_key: Vec<u8>,
            new_key_iv: Vec<u8>,
            new_cr_iv: Vec<u8>,
        ) -> Result<(), StoreError> {
            let mut tables = self.tables.write().await;
            let cr_id = tables.credentials.get(label).map(|c| c.cr_id).ok_or(StoreError::NotFound)?;
            if !tables.data_keys.contains_key(&cr_id.0) {
                return Err(StoreError::Integrity("credential row has no matching data_key row".into()));
            }
            // Both writes happen while holding the single lock, so a
            // reader never observes one half updated without the other —
            // the in-memory analogue of a database transaction.
            tables.credentials.get_mut(label).unwrap().ciphertext = new_ciphertext;
            tables.data_keys.insert(
                cr_id.0,
                DataKeyRow { cr_id, wrapped_key: new_wrapped_key, key_iv: new_key_iv, cr_iv: new_cr_iv },
            );
            Ok(())
        }
    }
}
