//! The public facade: subscribe, unsubscribe, status and teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::reaper::IdleReaper;
use crate::reconnect;
use crate::registry::ConnectionRegistry;
use crate::status::StatusSnapshot;
use crate::subscriber::{Subscriber, SubscriberId, SubscriberRegistry};
use crate::transport::Transport;

/// State shared between the facade, connection drivers, the reaper and
/// unsubscribe handles.
pub(crate) struct Shared {
    pub(crate) config: ManagerConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) connections: ConnectionRegistry,
    pub(crate) subscribers: SubscriberRegistry,
    shut_down: AtomicBool,
}

impl Shared {
    fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            connections: ConnectionRegistry::new(config.max_connections),
            subscribers: SubscriberRegistry::new(),
            transport,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Drop `id`'s membership on the connection serving `endpoint`, closing the
    /// connection if nobody is left on it.
    fn release(&self, endpoint: &str, id: &SubscriberId) {
        if let Some(connection) = self.connections.release(endpoint, id) {
            tracing::info!(
                connection = %connection.id(),
                endpoint = %connection.endpoint(),
                "Last subscriber left, closing connection"
            );
            connection.close(&self.subscribers);
        }
    }

    pub(crate) fn unsubscribe(&self, id: &SubscriberId) {
        match self.subscribers.unregister(id) {
            Some(endpoint) => {
                tracing::debug!(subscriber = %id, endpoint = %endpoint, "Unsubscribed");
                self.release(&endpoint, id);
            }
            None => {
                tracing::debug!(subscriber = %id, "Unsubscribe for unknown subscriber ignored");
            }
        }
    }

    /// Evict and close every empty connection idle longer than `threshold`.
    pub(crate) fn sweep_idle(&self, now: Instant, threshold: std::time::Duration) -> usize {
        let reaped = self.connections.reap_idle(now, threshold);
        for connection in &reaped {
            tracing::info!(
                connection = %connection.id(),
                endpoint = %connection.endpoint(),
                "Reaping idle connection"
            );
            connection.close(&self.subscribers);
        }
        reaped.len()
    }

    /// Close everything and forget every subscriber. Runs once.
    fn teardown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let connections = self.connections.drain();
        tracing::info!(
            connections = connections.len(),
            subscribers = self.subscribers.len(),
            "Tearing down stream manager"
        );
        for connection in &connections {
            connection.close(&self.subscribers);
        }
        self.subscribers.clear();
    }
}

/// Multiplexes many logical subscribers onto a bounded set of physical streams.
///
/// Subscribing to an endpoint that already has a live connection joins it; the
/// first subscriber for an endpoint opens one. At most
/// [`ManagerConfig::max_connections`] connections exist at a time; beyond that,
/// new endpoints share the busiest connection (see
/// [`ConnectionStatus::shared`](crate::ConnectionStatus::shared)). Failed streams
/// reconnect with exponential backoff, and empty connections are reaped when idle.
///
/// # Example
///
/// ```rust,no_run
/// use stream_manager::{
///     Callbacks, ManagerConfig, SseClientConfig, SseTransport, StreamManager, Subscriber,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = SseTransport::from_config(SseClientConfig::new("http://localhost:8080/api/"))?;
/// let manager = StreamManager::new(transport, ManagerConfig::default())?;
///
/// let handle = manager.subscribe(
///     "stream/incidents",
///     Subscriber::new("incident-panel", Callbacks::new(|envelope| {
///         println!("{}: {}", envelope.event_type(), envelope.data());
///     })),
/// );
///
/// // Later:
/// handle.unsubscribe();
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamManager {
    shared: Arc<Shared>,
    runtime: Handle,
    reaper: Mutex<Option<IdleReaper>>,
}

impl StreamManager {
    /// Create a manager on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// * `ManagerError::Configuration` - `config` failed validation
    /// * `ManagerError::NoRuntime` - called outside a tokio runtime
    pub fn new(transport: impl Transport, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let runtime =
            Handle::try_current().map_err(|e| ManagerError::NoRuntime(e.to_string()))?;

        let shared = Arc::new(Shared::new(config, Arc::new(transport)));
        let reaper = IdleReaper::start(
            &runtime,
            Arc::downgrade(&shared),
            shared.config.idle_sweep_interval,
            shared.config.idle_threshold,
        );

        tracing::debug!(
            max_connections = shared.config.max_connections,
            max_retries = shared.config.max_retries,
            "Stream manager created"
        );

        Ok(Self {
            shared,
            runtime,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Subscribe to a logical endpoint.
    ///
    /// Never fails: transport problems reach the subscriber through `on_error`.
    /// Subscribing an id that is already registered replaces its callbacks; if it
    /// was registered for a different endpoint, that membership is released first.
    /// When the serving connection is already open, `on_connect` fires before this
    /// returns.
    pub fn subscribe(&self, endpoint: &str, subscriber: Subscriber) -> Unsubscribe {
        let id = subscriber.id.clone();
        let handle = Unsubscribe {
            shared: Arc::downgrade(&self.shared),
            id: id.clone(),
        };

        if self.shared.is_shut_down() {
            tracing::warn!(subscriber = %id, endpoint, "Subscribe after shutdown ignored");
            return handle;
        }

        let callbacks = subscriber.callbacks.clone();
        if let Some(previous) = self.shared.subscribers.register(subscriber, endpoint) {
            if previous != endpoint {
                tracing::debug!(
                    subscriber = %id,
                    from = %previous,
                    to = endpoint,
                    "Moving subscriber to a new endpoint"
                );
                self.shared.release(&previous, &id);
            }
        }

        let resolved = self.shared.connections.resolve_and_attach(endpoint, &id);
        let connection = &resolved.connection;

        if resolved.created {
            self.runtime.spawn(reconnect::drive(
                Arc::clone(connection),
                Arc::clone(&self.shared),
            ));
        }
        if resolved.shared {
            tracing::warn!(
                subscriber = %id,
                endpoint,
                physical_endpoint = %connection.endpoint(),
                "Subscriber served by a shared connection"
            );
        }

        tracing::debug!(
            subscriber = %id,
            endpoint,
            connection = %connection.id(),
            subscribers = connection.subscriber_count(),
            "Subscribed"
        );

        if resolved.attached.is_some_and(|attached| attached.open) {
            callbacks.connected();
        }

        handle
    }

    /// Unsubscribe by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &SubscriberId) {
        self.shared.unsubscribe(id);
    }

    /// A read-only snapshot of connections and subscribers.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::collect(&self.shared.connections, self.shared.subscribers.len())
    }

    /// Run one idle sweep now. Returns the number of connections evicted.
    pub fn sweep_idle(&self) -> usize {
        self.shared
            .sweep_idle(Instant::now(), self.shared.config.idle_threshold)
    }

    /// Stop the reaper and close every connection.
    ///
    /// Members of live connections receive `on_disconnect`. Subscribing afterwards
    /// is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.shared.teardown();

        match reaper {
            Some(reaper) => reaper.shutdown().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManager")
            .field("config", &self.shared.config)
            .field("connections", &self.shared.connections.len())
            .field("subscribers", &self.shared.subscribers.len())
            .finish()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        tracing::debug!(
            connections = self.shared.connections.len(),
            "StreamManager dropping"
        );

        if let Some(mut reaper) = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reaper.abort();
        }
        self.shared.teardown();
    }
}

/// Handle returned by [`StreamManager::subscribe`].
///
/// Dropping the handle does not unsubscribe. The handle acts on the subscriber
/// id, so a handle from an earlier subscription of the same id removes the
/// current one.
#[must_use = "dropping the handle keeps the subscription alive with no way to end it but the id"]
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    shared: Weak<Shared>,
    id: SubscriberId,
}

impl Unsubscribe {
    /// Remove the subscription. A no-op once the manager is gone.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.unsubscribe(&self.id);
        }
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.id
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("connections", &self.connections.len())
            .field("subscribers", &self.subscribers.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
