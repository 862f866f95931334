//! Error types for the stream manager.
//!
//! Only construction and shutdown return errors to the caller. Everything that goes
//! wrong on a live stream is reported to subscribers through their `on_error`
//! callback as a [`StreamError`].

/// Errors returned by [`StreamManager`](crate::StreamManager) construction and shutdown.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The manager was created outside a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Background tasks did not stop cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stream could not be opened
    #[error("Failed to open stream: {0}")]
    Open(String),

    /// The stream failed after it was opened
    #[error("Stream failed: {0}")]
    Stream(String),

    /// The server ended the stream
    #[error("Stream closed by server")]
    Closed,
}

/// Errors delivered to subscribers via `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The transport failed; a reconnection is scheduled unless retries are exhausted
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reconnection gave up; the connection has been evicted
    #[error("Gave up on {endpoint} after {attempts} failed attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },
}

/// Convenience type alias for Results using ManagerError.
pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_error_display() {
        let error = ManagerError::Configuration("max connections must be > 0".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: max connections must be > 0"
        );

        let error = ManagerError::Shutdown("timeout".to_string());
        assert_eq!(error.to_string(), "Shutdown error: timeout");
    }

    #[test]
    fn test_stream_error_display() {
        let error = StreamError::from(TransportError::Closed);
        assert_eq!(error.to_string(), "Transport error: Stream closed by server");

        let error = StreamError::RetriesExhausted {
            endpoint: "/stream/a".to_string(),
            attempts: 5,
        };
        assert_eq!(
            error.to_string(),
            "Gave up on /stream/a after 5 failed attempts"
        );
    }
}
