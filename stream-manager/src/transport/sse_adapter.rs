//! Adapter binding the generic `sse-client` crate to the [`Transport`] trait.

use async_trait::async_trait;
use futures::StreamExt;
use sse_client::{SseClient, SseClientConfig, SseError};

use super::{RawMessage, Transport, TransportStream};
use crate::error::TransportError;

/// [`Transport`] over HTTP server-sent events.
///
/// Endpoints are paths resolved against the client's base URL (or absolute URLs).
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: SseClient,
}

impl SseTransport {
    pub fn new(client: SseClient) -> Self {
        Self { client }
    }

    /// Build a transport from a client configuration.
    pub fn from_config(config: SseClientConfig) -> Result<Self, SseError> {
        Ok(Self::new(SseClient::new(config)?))
    }

    pub fn client(&self) -> &SseClient {
        &self.client
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportStream, TransportError> {
        let stream = self
            .client
            .connect(endpoint)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        Ok(stream
            .map(|item| {
                item.map(|message| RawMessage {
                    data: message.data,
                    id: message.id,
                })
                .map_err(|e| TransportError::Stream(e.to_string()))
            })
            .boxed())
    }
}
