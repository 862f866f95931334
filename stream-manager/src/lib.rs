//! # stream-manager
//!
//! Connection manager for server-push data streams.
//!
//! Many independent UI components want live updates from a handful of streaming
//! endpoints. Opening one stream per component exhausts the browser or server
//! connection budget, so this crate multiplexes logical subscribers onto a bounded
//! pool of physical connections:
//!
//! - one connection per endpoint, shared by every subscriber of that endpoint
//! - a global ceiling ([`ManagerConfig::max_connections`], 4 by default); past it,
//!   new endpoints share the busiest existing connection and the sharing shows up
//!   in [`StatusSnapshot`]
//! - bounded exponential reconnection (`min(1s * 2^n, 30s)`, 5 retries), after which
//!   subscribers get [`StreamError::RetriesExhausted`] and `on_disconnect`
//! - eviction of connections whose last subscriber left, plus a periodic sweep of
//!   empty connections idle for more than 5 minutes
//!
//! Every message is normalized into an [`Envelope`]. A payload that is not valid
//! JSON becomes a `parse_error` envelope; the connection stays open.
//!
//! The physical stream sits behind the [`Transport`] trait. [`SseTransport`] speaks
//! server-sent events via the `sse-client` crate; tests plug in scripted transports.
//!
//! # Example
//!
//! ```rust,no_run
//! use stream_manager::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SseTransport::from_config(SseClientConfig::new("http://localhost:8080/api/"))?;
//! let manager = StreamManager::new(transport, ManagerConfig::default())?;
//!
//! let (callbacks, mut events) = Callbacks::channel();
//! let handle = manager.subscribe("stream/incidents", Subscriber::new("incident-panel", callbacks));
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SubscriberEvent::Event(envelope) => println!("{} {}", envelope.event_type(), envelope.data()),
//!         SubscriberEvent::Error(e) => eprintln!("stream error: {e}"),
//!         SubscriberEvent::Disconnected => break,
//!         SubscriberEvent::Connected => {}
//!     }
//! }
//!
//! handle.unsubscribe();
//! println!("{}", manager.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod manager;
mod reaper;
pub mod reconnect;
pub mod registry;
pub mod status;
pub mod subscriber;
pub mod transport;

pub use config::ManagerConfig;
pub use connection::{ConnectionId, ConnectionState};
pub use envelope::{Envelope, EnvelopeKind, MESSAGE_TYPE, PARSE_ERROR_TYPE};
pub use error::{ManagerError, Result, StreamError, TransportError};
pub use manager::{StreamManager, Unsubscribe};
pub use reconnect::Backoff;
pub use sse_client::SseClientConfig;
pub use status::{ConnectionStatus, StatusSnapshot};
pub use subscriber::{Callbacks, Subscriber, SubscriberEvent, SubscriberId};
pub use transport::{RawMessage, SseTransport, Transport, TransportStream};

/// Everything needed to subscribe and consume envelopes.
pub mod prelude {
    pub use crate::{
        Callbacks, Envelope, ManagerConfig, SseClientConfig, SseTransport, StatusSnapshot,
        StreamError, StreamManager, Subscriber, SubscriberEvent, SubscriberId, Unsubscribe,
    };
}
