//! Row types for the four persistent entities (§3).

use serde::{Deserialize, Serialize};

/// Unique user id, assigned by the store on creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid(pub i64);

/// Unique credential id, assigned by the store on creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrId(pub i64);

/// A Credentials Manager user: a username and a bcrypt-class hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub uid: Uid,
    pub username: String,
    pub salt: Vec<u8>,
    pub password_hash: Vec<u8>,
}

/// Summary row for `LIST USERS`: no salt, and the hash is truncated so it
/// is safe to print (mirrors the reference CLI's truncated display).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub uid: Uid,
    pub username: String,
    pub hash_prefix: String,
}

/// An encrypted credential record. `ciphertext` is opaque to the store —
/// only the crypto layer's cipher module knows how to read it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRow {
    pub cr_id: CrId,
    pub label: String,
    pub ciphertext: Vec<u8>,
}

/// The wrapped data key belonging to exactly one credential (§3 invariant:
/// one-to-one with `CredentialRow` by `cr_id`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataKeyRow {
    pub cr_id: CrId,
    pub wrapped_key: Vec<u8>,
    pub key_iv: Vec<u8>,
    pub cr_iv: Vec<u8>,
}

/// Grants `uid` the right to read the credential identified by `cr_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    pub perm_id: i64,
    pub uid: Uid,
    pub cr_id: CrId,
}
