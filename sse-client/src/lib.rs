//! Generic server-sent events client.
//!
//! This crate opens `text/event-stream` responses over HTTP and exposes them as a
//! stream of [`SseMessage`]s. It knows nothing about payload formats, subscribers or
//! reconnection policy; those belong to the consuming crate.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use sse_client::{SseClient, SseClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sse_client::SseError> {
//!     let client = SseClient::new(SseClientConfig::new("http://127.0.0.1:8080/"))?;
//!     let mut stream = client.connect("/stream/incidents").await?;
//!
//!     while let Some(message) = stream.next().await {
//!         println!("{:?}", message?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;

pub use client::{SseClient, SseClientConfig, SseMessage, SseStream, EVENT_STREAM_CONTENT_TYPE};
pub use error::{Result, SseError};
