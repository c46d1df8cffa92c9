//! Error types shared across tagspend crates.
//!
//! [`CoreError`] covers the failures that happen outside the cost store:
//! filesystem setup, logging initialization and path resolution.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by shared tagspend infrastructure.
#[derive(Debug, Error)]
pub enum CoreError {
    // =========================================================================
    // Filesystem Errors
    // =========================================================================
    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Home directory could not be determined
    #[error("Could not determine home directory")]
    HomeDirUnavailable,

    // =========================================================================
    // Logging Errors
    // =========================================================================
    /// Subscriber installation failed (usually: already installed)
    #[error("Failed to initialize logging: {message}")]
    LoggingInit { message: String },
}

impl CoreError {
    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::DirectoryCreation { .. } => {
                Some("Check permissions on the parent directory or pass --log-dir")
            }
            Self::HomeDirUnavailable => Some("Set HOME or pass explicit paths on the command line"),
            _ => None,
        }
    }
}
