//! Endpoint to connection mapping under a global connection ceiling.
//!
//! Every logical endpoint routes to at most one live connection. Below the ceiling
//! each new endpoint gets its own connection. At the ceiling, a new endpoint is
//! routed onto the existing connection with the most subscribers, and its
//! subscribers receive that connection's envelopes. The sharing is reported in
//! [`StatusSnapshot`](crate::StatusSnapshot) rather than hidden.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::connection::{Attached, Connection, ConnectionId, ConnectionIdGenerator};
use crate::subscriber::SubscriberId;

/// Outcome of resolving an endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub(crate) connection: Arc<Connection>,
    /// A new connection was created; its driver must be started
    pub(crate) created: bool,
    /// The endpoint was routed onto another endpoint's connection
    pub(crate) shared: bool,
    /// Set by `resolve_and_attach`
    pub(crate) attached: Option<Attached>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Logical endpoint -> serving connection
    routes: HashMap<String, ConnectionId>,
}

impl RegistryState {
    fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        let connection = self.connections.remove(&id)?;
        self.routes.retain(|_, routed| *routed != id);
        Some(connection)
    }

    /// Drop connections that went terminal without being evicted yet.
    fn prune_terminal(&mut self) {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.remove(id);
        }
    }
}

/// Registry of live connections.
///
/// A single coarse lock covers create, route and evict, so two racing subscribes
/// for one endpoint can never create two connections. Per-connection state has
/// its own lock, always taken after this one.
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
    max_connections: usize,
    ids: ConnectionIdGenerator,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            max_connections,
            ids: ConnectionIdGenerator::new(),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Find or create the connection serving `endpoint`, without attaching.
    #[cfg(test)]
    pub(crate) fn resolve(&self, endpoint: &str) -> Resolved {
        let mut state = self.lock();
        self.resolve_locked(&mut state, endpoint)
    }

    /// Resolve `endpoint` and add `subscriber` as a member, atomically.
    pub(crate) fn resolve_and_attach(&self, endpoint: &str, subscriber: &SubscriberId) -> Resolved {
        let mut state = self.lock();
        loop {
            let mut resolved = self.resolve_locked(&mut state, endpoint);
            match resolved.connection.attach(subscriber, endpoint) {
                Some(attached) => {
                    resolved.attached = Some(attached);
                    return resolved;
                }
                // Went terminal between resolve and attach; evict and go again.
                None => {
                    state.remove(resolved.connection.id());
                }
            }
        }
    }

    fn resolve_locked(&self, state: &mut RegistryState, endpoint: &str) -> Resolved {
        state.prune_terminal();

        if let Some(connection) = state
            .routes
            .get(endpoint)
            .and_then(|id| state.connections.get(id))
        {
            return Resolved {
                shared: connection.endpoint() != endpoint,
                connection: Arc::clone(connection),
                created: false,
                attached: None,
            };
        }

        // At the ceiling: share the busiest connection. Ties go to the oldest.
        let busiest = if state.connections.len() >= self.max_connections {
            state
                .connections
                .values()
                .max_by(|a, b| {
                    a.subscriber_count()
                        .cmp(&b.subscriber_count())
                        .then_with(|| b.id().cmp(&a.id()))
                })
                .cloned()
        } else {
            None
        };

        if let Some(connection) = busiest {
            state.routes.insert(endpoint.to_string(), connection.id());

            tracing::warn!(
                endpoint,
                connection = %connection.id(),
                physical_endpoint = %connection.endpoint(),
                max_connections = self.max_connections,
                "Connection ceiling reached, sharing existing stream"
            );

            return Resolved {
                connection,
                created: false,
                shared: true,
                attached: None,
            };
        }

        let connection = Arc::new(Connection::new(self.ids.next(), endpoint));
        state
            .connections
            .insert(connection.id(), Arc::clone(&connection));
        state.routes.insert(endpoint.to_string(), connection.id());

        tracing::debug!(
            connection = %connection.id(),
            endpoint,
            live = state.connections.len(),
            "Created stream connection"
        );

        Resolved {
            connection,
            created: true,
            shared: false,
            attached: None,
        }
    }

    /// Remove `subscriber` from the connection serving `endpoint`.
    ///
    /// If that leaves the connection empty it is evicted and returned; the caller
    /// closes it.
    pub(crate) fn release(&self, endpoint: &str, subscriber: &SubscriberId) -> Option<Arc<Connection>> {
        let mut state = self.lock();

        let id = *state.routes.get(endpoint)?;
        let connection = Arc::clone(state.connections.get(&id)?);

        let remaining = connection.detach(subscriber)?;
        tracing::debug!(
            connection = %id,
            endpoint,
            subscriber = %subscriber,
            remaining,
            "Released subscriber"
        );

        if remaining == 0 {
            return state.remove(id);
        }

        // Forget a shared route once nobody uses it.
        if endpoint != connection.endpoint() && !connection.serves(endpoint) {
            state.routes.remove(endpoint);
        }
        None
    }

    /// Evict a connection regardless of membership.
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().remove(id)
    }

    /// Evict a connection only if it has no members. Returns true if evicted.
    pub(crate) fn remove_if_empty(&self, id: ConnectionId) -> bool {
        let mut state = self.lock();
        let empty = state
            .connections
            .get(&id)
            .map_or(true, |c| c.subscriber_count() == 0);
        if empty {
            state.remove(id);
        }
        empty
    }

    /// Evict every empty connection idle for longer than `threshold` as of `now`.
    pub(crate) fn reap_idle(&self, now: Instant, threshold: Duration) -> Vec<Arc<Connection>> {
        let mut state = self.lock();
        let idle: Vec<ConnectionId> = state
            .connections
            .values()
            .filter(|c| {
                c.subscriber_count() == 0
                    && now.saturating_duration_since(c.last_activity()) > threshold
            })
            .map(|c| c.id())
            .collect();

        idle.into_iter().filter_map(|id| state.remove(id)).collect()
    }

    /// Evict everything, for teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<Connection>> {
        let mut state = self.lock();
        state.routes.clear();
        state.connections.drain().map(|(_, c)| c).collect()
    }

    /// The live connection `endpoint` routes to, if any.
    pub fn get(&self, endpoint: &str) -> Option<Arc<Connection>> {
        let state = self.lock();
        let id = state.routes.get(endpoint)?;
        state.connections.get(id).cloned()
    }

    /// All registered connections, oldest first.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let state = self.lock();
        let mut connections: Vec<_> = state.connections.values().cloned().collect();
        connections.sort_by_key(|c| c.id());
        connections
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
