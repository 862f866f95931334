//! The physical stream seam.
//!
//! A [`Transport`] opens one physical stream per call. The manager never shares a
//! [`TransportStream`] between connections, and dropping it releases the stream.

mod sse_adapter;

pub use sse_adapter::SseTransport;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;

/// One message as received from the transport, before envelope parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Serialized envelope
    pub data: String,
    /// Transport-level event id, if the transport has one
    pub id: Option<String>,
}

impl RawMessage {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Messages from an open stream. An `Err` item or the end of the stream is a
/// runtime failure of the connection.
pub type TransportStream = BoxStream<'static, Result<RawMessage, TransportError>>;

/// Opens physical streams to endpoints.
///
/// Resolving to `Ok` is the open signal: the connection moves to `Open` and its
/// subscribers are told they are connected. There is no timeout around this call;
/// an implementation that never resolves leaves the connection in `Connecting`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the stream for `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<TransportStream, TransportError>;
}
