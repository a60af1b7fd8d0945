//! IPC error types and utilities

use thiserror::Error;

/// IPC-specific error types
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to receive request: {0}")]
    ReceiveFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl IpcError {
    /// Get error code for this error type
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            IpcError::ConnectionFailed(_) => "IPC001",
            IpcError::SendFailed(_) => "IPC002",
            IpcError::ReceiveFailed(_) => "IPC003",
            IpcError::SerializationFailed(_) => "IPC004",
            IpcError::DeserializationFailed(_) => "IPC005",
            IpcError::FrameTooLarge(_) => "IPC006",
            IpcError::ProtocolError(_) => "IPC007",
        }
    }
}

/// IPC-specific result type
pub type Result<T> = std::result::Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            IpcError::ConnectionFailed("test".to_string()).code(),
            "IPC001"
        );
        assert_eq!(IpcError::SendFailed("test".to_string()).code(), "IPC002");
        assert_eq!(IpcError::FrameTooLarge(70_000).code(), "IPC006");
        assert_eq!(
            IpcError::ProtocolError("test".to_string()).code(),
            "IPC007"
        );
    }

    #[test]
    fn test_error_display() {
        let error = IpcError::ConnectionFailed("connection refused".to_string());
        assert_eq!(error.to_string(), "Connection failed: connection refused");
    }
}
