use pulsemon_common::retry::RetryError;
use pulsemon_common::types::MetricError;
use sea_orm::DbErr;
use std::path::PathBuf;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulsemon_storage::error::StorageError;
/// use pulsemon_common::types::MetricError;
///
/// let err = StorageError::from(MetricError::MissingDelta("PollCount".into()));
/// assert!(err.to_string().contains("PollCount"));
/// assert!(!err.is_cancelled());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A metric failed validation before reaching the backend.
    #[error("Storage: invalid metric: {0}")]
    InvalidMetric(#[from] MetricError),

    /// A database call outside the retry wrapper (connect, migrate, close).
    #[error("Storage: database error: {0}")]
    Database(#[from] DbErr),

    /// A retried database call that failed or was cancelled.
    #[error("Storage: {0}")]
    Retry(#[from] RetryError<DbErr>),

    /// Reading or writing the snapshot file failed.
    #[error("Storage: I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file could not be encoded or decoded.
    #[error("Storage: snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the call was abandoned because the server is shutting down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Retry(e) if e.is_cancelled())
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
