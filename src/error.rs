//! Error types for the host updater.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the host updater.
#[derive(Error, Debug)]
pub enum Error {
    // Checksum gate errors
    #[error("Checksum mismatch for {module}: expected {expected}, published {actual}")]
    ChecksumMismatch {
        module: String,
        expected: String,
        actual: String,
    },

    #[error("Checksum unavailable for {0}")]
    ChecksumUnavailable(String),

    // Backup / restore errors
    #[error("Backup failed for {module}: {reason}")]
    BackupFailed { module: String, reason: String },

    #[error("No backup found: {0}")]
    BackupNotFound(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    // Hotfix errors
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Critical rollback step failed: {0}")]
    CriticalRollback(String),

    // External process errors
    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("Command failed ({command}, exit {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    // Migration errors
    #[error("Migration {id} failed: {reason}")]
    MigrationFailed { id: u32, reason: String },

    // Manifest errors
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("{failed} of {total} module update(s) failed")]
    UpdatesFailed { failed: usize, total: usize },

    // File system errors
    #[error("Path not found: {0}")]
    PathNotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Whether this error came from a subprocess exceeding its budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = Error::Timeout {
            command: "systemctl stop nginx".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(!Error::other("boom").is_timeout());
    }

    #[test]
    fn test_checksum_mismatch_message() {
        let err = Error::ChecksumMismatch {
            module: "pihole".to_string(),
            expected: "aaaa".to_string(),
            actual: "bbbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pihole"));
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
    }
}
