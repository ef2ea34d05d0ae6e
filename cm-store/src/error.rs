//! Store error kinds (§4.3, §7).

use core::fmt;

#[derive(Clone, Debug)]
pub enum StoreError {
    /// The row a caller asked to mutate or delete does not exist.
    NotFound,
    /// A unique constraint (`username`, `label`, or `(uid, cr_id)`) was
    /// violated by an insert.
    AlreadyExists,
    /// The one-to-one `credentials`/`data_keys` pairing was violated. The
    /// store does not attempt to synthesize the missing half (§7).
    Integrity(String),
    /// The backend (connection pool, driver) is unavailable or returned
    /// an error that isn't one of the above.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "not found"),
            StoreError::AlreadyExists => write!(f, "already exists"),
            StoreError::Integrity(m) => write!(f, "integrity violation: {}", m),
            StoreError::Backend(m) => write!(f, "backend error: {}", m),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::AlreadyExists,
            other => StoreError::Backend(other.to_string()),
        }
    }
}
