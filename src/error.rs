use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("repository misconfigured: {0}")]
    Configuration(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed filename '{0}', expected <base>-<8 hex chars>.<ext>")]
    MalformedFilename(String),

    #[error("metadata document at {path} is unreadable: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("git {operation} did not finish within {timeout:?}")]
    SyncTimeout { operation: String, timeout: std::time::Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LibraryError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether retrying the same call later may succeed without a change on
    /// the caller's side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SyncTimeout { .. } => true,
            Self::Git { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("could not resolve host")
                    || stderr.contains("connection timed out")
                    || stderr.contains("unable to access")
                    || stderr.contains("index.lock")
            }
            Self::Io(e) => matches!(e.kind(), std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock),
            _ => false,
        }
    }

    /// Short machine-readable reason, rendered next to the message by the API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Conflict(_) => "conflict",
            Self::MalformedFilename(_) => "malformed_filename",
            Self::CorruptStore { .. } => "corrupt_store",
            Self::Upload(_) => "upload",
            Self::SyncTimeout { .. } => "sync_timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Git { .. } => "git",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T, E = LibraryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeouts_are_retryable() {
        let err = LibraryError::SyncTimeout { operation: "pull".to_string(), timeout: Duration::from_secs(5) };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "sync_timeout");
    }

    #[test]
    fn conflicts_are_not_retryable() {
        assert!(!LibraryError::conflict("exists").is_retryable());
        let err = LibraryError::Git { command: "push".to_string(), stderr: "fatal: unable to access 'https://x/'".to_string() };
        assert!(err.is_retryable());
    }
}
