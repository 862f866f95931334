//! Error types for the SSE client.

/// Errors raised while opening or reading a server-sent events stream.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// The base URL or the requested path could not be turned into a URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP request failed before a response was received
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The server answered with something other than `text/event-stream`
    #[error("Unexpected content type '{content_type}' from {url}")]
    ContentType { content_type: String, url: String },

    /// The stream failed after it was opened
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Convenience alias for results carrying [`SseError`].
pub type Result<T> = std::result::Result<T, SseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SseError::Status {
            status: 503,
            url: "http://localhost/stream/a".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unexpected status 503 from http://localhost/stream/a"
        );

        let error = SseError::ContentType {
            content_type: "text/html".to_string(),
            url: "http://localhost/".to_string(),
        };
        assert!(error.to_string().contains("text/html"));

        let error = SseError::Stream("connection reset".to_string());
        assert_eq!(error.to_string(), "Stream error: connection reset");
    }
}
