//! Custom error types for driveup

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for driveup operations
#[derive(Error, Debug)]
pub enum DriveupError {
    #[error("Cannot read directory {}: {source}", .path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file name pattern: {0}")]
    PatternSyntax(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Google Drive error: {0}")]
    Drive(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl DriveupError {
    /// Build a `DirectoryAccess` error for `path`
    pub fn directory_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriveupError::DirectoryAccess {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriveupError>;
