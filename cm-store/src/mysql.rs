//! `sqlx`-backed [`Store`] implementation against the relational schema
//! in §6: `users`, `credentials`, `data_keys`, `permissions`.

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

use crate::backend::Store;
use crate::error::StoreError;
use crate::types::{CrId, CredentialRow, DataKeyRow, PermissionRow, Uid, UserRow, UserSummary};

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPool::connect(url).await.map_err(StoreError::from)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for MySqlBackend {
    async fn put_user(&self, username: &str, salt: Vec<u8>, hash: Vec<u8>) -> Result<Uid, StoreError> {
        let result = sqlx::query("INSERT INTO users (username, salt, password_hash) VALUES (?, ?, ?)")
            .bind(username)
            .bind(&salt)
            .bind(&hash)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(Uid(result.last_insert_id() as i64))
    }

    async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn fetch_user(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query("SELECT uid, username, salt, password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|r| UserRow {
            uid: Uid(r.get::<i64, _>("uid")),
            username: r.get("username"),
            salt: r.get("salt"),
            password_hash: r.get("password_hash"),
        }))
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        let rows = sqlx::query("SELECT uid, username, password_hash FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let hash: Vec<u8> = r.get("password_hash");
                UserSummary {
                    uid: Uid(r.get::<i64, _>("uid")),
                    username: r.get("username"),
                    hash_prefix: hex::encode(hash).chars().take(16).collect(),
                }
            })
            .collect())
    }

    async fn put_credential(&self, label: &str, ciphertext: Vec<u8>) -> Result<CrId, StoreError> {
        let result = sqlx::query("INSERT INTO credentials (label, ciphertext) VALUES (?, ?)")
            .bind(label)
            .bind(&ciphertext)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(CrId(result.last_insert_id() as i64))
    }

    async fn delete_credential(&self, label: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let cr_id: Option<i64> = sqlx::query_scalar("SELECT cr_id FROM credentials WHERE label = ?")
            .bind(label)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let cr_id = cr_id.ok_or(StoreError::NotFound)?;
        sqlx::query("DELETE FROM data_keys WHERE cr_id = ?").bind(cr_id).execute(&mut *tx).await.map_err(StoreError::from)?;
        sqlx::query("DELETE FROM permissions WHERE cr_id = ?").bind(cr_id).execute(&mut *tx).await.map_err(StoreError::from)?;
        sqlx::query("DELETE FROM credentials WHERE cr_id = ?").bind(cr_id).execute(&mut *tx).await.map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn fetch_credential(&self, label: &str) -> Result<Option<CredentialRow>, StoreError> {
        let row = sqlx::query("SELECT cr_id, label, ciphertext FROM credentials WHERE label = ?")
            .bind(label)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|r| CredentialRow {
            cr_id: CrId(r.get::<i64, _>("cr_id")),
            label: r.get("label"),
            ciphertext: r.get("ciphertext"),
        }))
    }

    async fn list_credentials(&self) -> Result<Vec<CredentialRow>, StoreError> {
        let rows = sqlx::query("SELECT cr_id, label, ciphertext FROM credentials")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|r| CredentialRow {
                cr_id: CrId(r.get::<i64, _>("cr_id")),
                label: r.get("label"),
                ciphertext: r.get("ciphertext"),
            })
            .collect())
    }

    async fn put_data_key(&self, cr_id: CrId, wrapped: Vec<u8>, key_iv: Vec<u8>, cr_iv: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO data_keys (cr_id, wrapped_key, key_iv, cr_iv) VALUES (?, ?, ?, ?)")
            .bind(cr_id.0)
            .bind(&wrapped)
            .bind(&key_iv)
            .bind(&cr_iv)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn fetch_data_key(&self, cr_id: CrId) -> Result<Option<DataKeyRow>, StoreError> {
        let row = sqlx::query("SELECT cr_id, wrapped_key, key_iv, cr_iv FROM data_keys WHERE cr_id = ?")
            .bind(cr_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|r| DataKeyRow {
            cr_id: CrId(r.get::<i64, _>("cr_id")),
            wrapped_key: r.get("wrapped_key"),
            key_iv: r.get("key_iv"),
            cr_iv: r.get("cr_iv"),
        }))
    }

    async fn update_data_key(&self, cr_id: CrId, new_wrapped_key: Vec<u8>, new_key_iv: Vec<u8>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE data_keys SET wrapped_key = ?, key_iv = ? WHERE cr_id = ?")
            .bind(&new_wrapped_key)
            .bind(&new_key_iv)
            .bind(cr_id.0)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn put_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO permissions (uid, cr_id) VALUES (?, ?)")
            .bind(uid.0)
            .bind(cr_id.0)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete_permission(&self, uid: Uid, cr_id: CrId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM permissions WHERE uid = ? AND cr_id = ?")
            .bind(uid.0)
            .bind(cr_id.0)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn has_permission(&self, uid: Uid, cr_id: CrId) -> Result<bool, StoreError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT perm_id FROM permissions WHERE uid = ? AND cr_id = ?")
            .bind(uid.0)
            .bind(cr_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.is_some())
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRow>, StoreError> {
        let rows = sqlx::query("SELECT perm_id, uid, cr_id FROM permissions")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|r| PermissionRow {
                perm_id: r.get("perm_id"),
                uid: Uid(r.get::<i64, _>("uid")),
                cr_id: CrId(r.get::<i64, _>("cr_id")),
            })
            .collect())
    }

    async fn update_credential_and_key(
        &self,
        label: &str,
        new_ciphertext: Vec<u8>,
        new_wrapped_key: Vec<u8>,
        new_key_iv: Vec<u8>,
        new_cr_iv: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let cr_id: Option<i64> = sqlx::query_scalar("SELECT cr_id FROM credentials WHERE label = ?")
            .bind(label)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let cr_id = cr_id.ok_or(StoreError::NotFound)?;

        sqlx::query("UPDATE credentials SET ciphertext = ? WHERE cr_id = ?")
            .bind(&new_ciphertext)
            .bind(cr_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let updated = sqlx::query("UPDATE data_keys SET wrapped_key = ?, key_iv = ?, cr_iv = ? WHERE cr_id = ?")
            .bind(&new_wrapped_key)
            .bind(&new_key_iv)
            .bind(&new_cr_iv)
            .bind(cr_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Integrity("credential row has no matching data_key row".into()));
        }
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}
