use thiserror::Error;

/// Persistence failures, classified so callers can tell a retryable conflict
/// from a hard error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// `lock_timeout` expired waiting for the per-PR lock (55P03)
    #[error("timed out waiting for the pull request lock")]
    LockTimeout,
    /// Serialization failure or deadlock (40001 / 40P01)
    #[error("transaction conflict: {0}")]
    Conflict(String),
    /// Unique index violation (23505)
    #[error("duplicate row: {0}")]
    Duplicate(String),
    #[error("connection unavailable: {0}")]
    Unavailable(String),
    #[error("invalid data: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout
                | StoreError::Conflict(_)
                | StoreError::Duplicate(_)
                | StoreError::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => return StoreError::Conflict(message),
                Some("55P03") => return StoreError::LockTimeout,
                Some("23505") => return StoreError::Duplicate(message),
                _ => {}
            }
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Validation(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}
