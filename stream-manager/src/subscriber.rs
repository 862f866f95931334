//! Subscribers and the registry that owns their callbacks.
//!
//! Connections only ever hold [`SubscriberId`]s. The [`SubscriberRegistry`] is the
//! single owner of callback state, so a connection can be torn down or rebuilt
//! without touching a subscriber's callbacks.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::StreamError;

/// Caller-supplied identity of a subscriber.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SubscriberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type EventFn = Arc<dyn Fn(&Envelope) + Send + Sync>;
type SignalFn = Arc<dyn Fn() + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// The callback set of one subscriber. Only `on_event` is required; absent
/// callbacks are no-ops.
///
/// Callbacks run on the connection's task and should return quickly. Hand heavy
/// work off to a channel, or use [`Callbacks::channel`].
#[derive(Clone)]
pub struct Callbacks {
    on_event: EventFn,
    on_connect: Option<SignalFn>,
    on_disconnect: Option<SignalFn>,
    on_error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new(on_event: impl Fn(&Envelope) + Send + Sync + 'static) -> Self {
        Self {
            on_event: Arc::new(on_event),
            on_connect: None,
            on_disconnect: None,
            on_error: None,
        }
    }

    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Callbacks that forward every notification into a channel.
    ///
    /// Sends to a dropped receiver are ignored.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubscriberEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let event_tx = tx.clone();
        let connect_tx = tx.clone();
        let disconnect_tx = tx.clone();
        let callbacks = Self::new(move |envelope| {
            let _ = event_tx.send(SubscriberEvent::Event(envelope.clone()));
        })
        .on_connect(move || {
            let _ = connect_tx.send(SubscriberEvent::Connected);
        })
        .on_disconnect(move || {
            let _ = disconnect_tx.send(SubscriberEvent::Disconnected);
        })
        .on_error(move |error| {
            let _ = tx.send(SubscriberEvent::Error(error.clone()));
        });

        (callbacks, rx)
    }

    pub(crate) fn event(&self, envelope: &Envelope) {
        (self.on_event)(envelope)
    }

    pub(crate) fn connected(&self) {
        if let Some(f) = &self.on_connect {
            f()
        }
    }

    pub(crate) fn disconnected(&self) {
        if let Some(f) = &self.on_disconnect {
            f()
        }
    }

    pub(crate) fn error(&self, error: &StreamError) {
        if let Some(f) = &self.on_error {
            f(error)
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Notifications produced by [`Callbacks::channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberEvent {
    Event(Envelope),
    Connected,
    Disconnected,
    Error(StreamError),
}

/// A logical consumer: an identity plus its callbacks.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub callbacks: Callbacks,
}

impl Subscriber {
    pub fn new(id: impl Into<SubscriberId>, callbacks: Callbacks) -> Self {
        Self {
            id: id.into(),
            callbacks,
        }
    }
}

struct SubscriberEntry {
    callbacks: Callbacks,
    endpoint: String,
}

/// Canonical store of subscriber callbacks, keyed by id.
///
/// Membership here is the source of truth for whether an id is still active.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: DashMap<SubscriberId, SubscriberEntry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a subscriber for a logical endpoint.
    ///
    /// Returns the endpoint the id was previously registered for, if any.
    pub fn register(&self, subscriber: Subscriber, endpoint: &str) -> Option<String> {
        self.entries
            .insert(
                subscriber.id,
                SubscriberEntry {
                    callbacks: subscriber.callbacks,
                    endpoint: endpoint.to_string(),
                },
            )
            .map(|previous| previous.endpoint)
    }

    /// Remove a subscriber, returning the endpoint it was registered for.
    pub fn unregister(&self, id: &SubscriberId) -> Option<String> {
        self.entries.remove(id).map(|(_, entry)| entry.endpoint)
    }

    /// Look up a subscriber's callbacks. The returned set is a cheap clone, so no
    /// registry lock is held while it runs.
    pub fn get(&self, id: &SubscriberId) -> Option<Callbacks> {
        self.entries.get(id).map(|entry| entry.callbacks.clone())
    }

    pub fn endpoint_of(&self, id: &SubscriberId) -> Option<String> {
        self.entries.get(id).map(|entry| entry.endpoint.clone())
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_absent_callbacks_are_noops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let callbacks = Callbacks::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        callbacks.connected();
        callbacks.disconnected();
        callbacks.error(&StreamError::Transport(crate::error::TransportError::Closed));
        callbacks.event(&Envelope::parse("{}", None, Utc::now()));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_callbacks_forward_everything() {
        let (callbacks, mut rx) = Callbacks::channel();

        callbacks.connected();
        callbacks.event(&Envelope::parse(r#"{"data":1}"#, None, Utc::now()));
        callbacks.error(&StreamError::Transport(crate::error::TransportError::Closed));
        callbacks.disconnected();

        assert_eq!(rx.try_recv().unwrap(), SubscriberEvent::Connected);
        assert!(matches!(rx.try_recv().unwrap(), SubscriberEvent::Event(_)));
        assert!(matches!(rx.try_recv().unwrap(), SubscriberEvent::Error(_)));
        assert_eq!(rx.try_recv().unwrap(), SubscriberEvent::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registry_register_and_unregister() {
        let registry = SubscriberRegistry::new();
        let id = SubscriberId::new("incidents-panel");

        let previous = registry.register(Subscriber::new(id.clone(), Callbacks::new(|_| {})), "/stream/a");
        assert!(previous.is_none());
        assert!(registry.contains(&id));
        assert_eq!(registry.endpoint_of(&id).as_deref(), Some("/stream/a"));

        // Re-registering reports where the id used to live.
        let previous = registry.register(Subscriber::new(id.clone(), Callbacks::new(|_| {})), "/stream/b");
        assert_eq!(previous.as_deref(), Some("/stream/a"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.unregister(&id).as_deref(), Some("/stream/b"));
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_callbacks_debug_shows_presence() {
        let callbacks = Callbacks::new(|_| {}).on_error(|_| {});
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("on_error: true"));
        assert!(debug.contains("on_connect: false"));
    }
}
