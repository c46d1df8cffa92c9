//! Error types for tag cost storage and ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Cost store and ingestion errors.
#[derive(Error, Debug)]
pub enum CostError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database still locked after the retry budget was spent
    #[error("database is locked (retry {retry_count}/{max_retries}): {message}")]
    DatabaseLocked {
        /// Retry attempt number
        retry_count: u32,
        /// Maximum retries allowed
        max_retries: u32,
        /// Human-readable message
        message: String,
    },

    /// Connection mutex poisoned by a panicking holder
    #[error("database connection unavailable: {0}")]
    Lock(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (file reading)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Export file did not have a recognizable shape
    #[error("invalid export {path}: {message}")]
    InvalidExport { path: PathBuf, message: String },

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),
}

impl CostError {
    /// Check if this error is retryable (e.g., database locked).
    pub fn is_retryable(&self) -> bool {
        self.is_database_locked()
    }

    /// Check if this error indicates a database lock.
    pub fn is_database_locked(&self) -> bool {
        match self {
            CostError::DatabaseLocked { .. } => true,
            CostError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }

    /// Create a user-friendly message for this error.
    pub fn friendly_message(&self) -> String {
        match self {
            CostError::DatabaseLocked {
                retry_count,
                max_retries,
                ..
            } => {
                format!(
                    "Database is still busy after {}/{} retries. Try again shortly.",
                    retry_count, max_retries
                )
            }
            CostError::Database(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    "Database is temporarily locked. Please try again.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            CostError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    "Permission denied. Check file permissions.".to_string()
                }
                std::io::ErrorKind::NotFound => "File or directory not found.".to_string(),
                _ => format!("File system error: {}", e),
            },
            _ => format!("Error: {}", self),
        }
    }
}

/// Result type for cost tracking operations.
pub type Result<T> = std::result::Result<T, CostError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> CostError {
        CostError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_busy_is_retryable() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_retryable());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_database_locked());
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_retryable());
    }

    #[test]
    fn test_non_database_errors_not_retryable() {
        assert!(!CostError::Migration("bad".into()).is_retryable());
        assert!(!CostError::Lock("poisoned".into()).is_retryable());
    }

    #[test]
    fn test_friendly_message() {
        let err = CostError::DatabaseLocked {
            retry_count: 2,
            max_retries: 5,
            message: "busy".into(),
        };
        assert!(err.friendly_message().contains("2/5"));

        let err = CostError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(err.friendly_message(), "File or directory not found.");
    }
}
