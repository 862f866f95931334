//! HTTP client for opening server-sent events streams.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use url::Url;

use crate::error::{Result, SseError};

/// Content type every SSE response must carry.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// A single event read off an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// The `event:` field; `"message"` when the server did not name it
    pub event: String,
    /// The `data:` field, multi-line data joined with `\n`
    pub data: String,
    /// The `id:` field, `None` when absent or empty
    pub id: Option<String>,
    /// Reconnection hint sent by the server via `retry:`
    pub retry: Option<Duration>,
}

/// Stream of messages from one open SSE response.
///
/// Dropping the stream closes the underlying HTTP connection.
pub type SseStream = BoxStream<'static, Result<SseMessage>>;

/// Configuration for [`SseClient`].
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// Base URL that relative stream paths are resolved against
    /// Default: `http://127.0.0.1:8080/`
    pub base_url: String,

    /// TCP connect timeout for the HTTP client
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Extra headers sent with every stream request (e.g. authorization)
    pub headers: Vec<(String, String)>,

    /// User agent string
    pub user_agent: String,
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            connect_timeout: Duration::from_secs(10),
            headers: Vec::new(),
            user_agent: format!("traffic-sse-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SseClientConfig {
    /// Create a config pointed at `base_url` with defaults for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| SseError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if url.cannot_be_a_base() {
            return Err(SseError::Configuration(format!(
                "Base URL '{}' cannot be used as a base",
                self.base_url
            )));
        }

        if self.connect_timeout == Duration::ZERO {
            return Err(SseError::Configuration(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Client that opens SSE streams relative to a base URL.
///
/// The client is cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SseClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SseClient {
    /// Build a client from `config`.
    pub fn new(config: SseClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| SseError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SseError::Configuration(format!("Invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SseError::Configuration(format!("Invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        // No overall request timeout: streams are meant to stay open indefinitely.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self { http, base_url })
    }

    /// The base URL relative paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a stream path against the base URL.
    ///
    /// Absolute URLs are returned unchanged.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(path) {
            return Ok(absolute);
        }
        self.base_url.join(path).map_err(|e| SseError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Open the stream at `path`.
    ///
    /// Returns once the server has answered with a `2xx` `text/event-stream`
    /// response; the returned stream then yields messages as they arrive.
    pub async fn connect(&self, path: &str) -> Result<SseStream> {
        let url = self.resolve(path)?;
        tracing::debug!(url = %url, "Opening SSE stream");

        let response = self.http.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SseError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
            return Err(SseError::ContentType {
                content_type,
                url: url.to_string(),
            });
        }

        tracing::debug!(url = %url, "SSE stream open");

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(SseMessage {
                    event: if event.event.is_empty() {
                        "message".to_string()
                    } else {
                        event.event
                    },
                    data: event.data,
                    id: Some(event.id).filter(|id| !id.is_empty()),
                    retry: event.retry,
                }),
                Err(e) => Err(SseError::Stream(e.to_string())),
            });

        Ok(stream.boxed())
    }
}
