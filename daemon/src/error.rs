//! Daemon error types

use thiserror::Error;

/// Daemon-level error types
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;

impl From<ipc::IpcError> for DaemonError {
    fn from(err: ipc::IpcError) -> Self {
        DaemonError::ServerError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaemonError::ConfigurationError("bad port".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad port");
    }

    #[test]
    fn test_ipc_error_converts() {
        let err: DaemonError = ipc::IpcError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(err, DaemonError::ServerError(_)));
    }
}
