//! One physical stream and the subscribers it serves.
//!
//! A [`Connection`] holds subscriber identities only. Callbacks are looked up in
//! the [`SubscriberRegistry`] at dispatch time and always invoked with no lock held,
//! so a callback may freely subscribe or unsubscribe.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::envelope::Envelope;
use crate::error::{StreamError, TransportError};
use crate::reconnect::Backoff;
use crate::subscriber::{Callbacks, SubscriberId, SubscriberRegistry};
use crate::transport::RawMessage;

/// Identity of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Generates process-unique connection ids.
#[derive(Debug)]
pub(crate) struct ConnectionIdGenerator(AtomicU64);

impl ConnectionIdGenerator {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a connection.
///
/// `Connecting → Open → Connecting → ... → Closed | Exhausted`. Both `Closed` and
/// `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Exhausted,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Exhausted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// What the driver should do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorOutcome {
    /// Sleep for `delay`, then make reconnection attempt number `attempt`
    Retry {
        attempt: u32,
        delay: std::time::Duration,
    },
    /// Retries are used up after `attempts` consecutive failures; the connection is
    /// now `Exhausted`
    Exhausted { attempts: u32 },
    /// The connection was closed while the failure was in flight
    Closed,
}

/// Result of adding a subscriber to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attached {
    /// False when the id was already a member
    pub(crate) added: bool,
    /// The connection is already open, so the newcomer will not see the open signal
    pub(crate) open: bool,
}

/// Point-in-time view of a connection for status reporting.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionView {
    pub(crate) state: ConnectionState,
    pub(crate) subscriber_count: usize,
    pub(crate) endpoints: Vec<String>,
    pub(crate) last_activity: DateTime<Utc>,
    pub(crate) retry_count: u32,
}

struct ConnectionInner {
    state: ConnectionState,
    /// Member id -> the logical endpoint it subscribed to
    subscribers: BTreeMap<SubscriberId, String>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    retry_count: u32,
}

impl ConnectionInner {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    fn members(&self) -> Vec<SubscriberId> {
        self.subscribers.keys().cloned().collect()
    }
}

/// The manager's handle to one physical stream.
///
/// All mutable state sits behind one mutex scoped to this connection, so fan-out
/// and reconnection never race on membership, state or the retry counter. The
/// transport stream itself lives only inside the connection's driver task.
pub struct Connection {
    id: ConnectionId,
    endpoint: String,
    inner: Mutex<ConnectionInner>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, endpoint: impl Into<String>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            endpoint: endpoint.into(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                subscribers: BTreeMap::new(),
                last_activity: Instant::now(),
                last_activity_at: Utc::now(),
                retry_count: 0,
            }),
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The physical endpoint this connection streams from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().state.is_terminal()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn is_member(&self, id: &SubscriberId) -> bool {
        self.lock().subscribers.contains_key(id)
    }

    pub(crate) fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    /// True while any member subscribed through `endpoint`.
    pub(crate) fn serves(&self, endpoint: &str) -> bool {
        self.lock().subscribers.values().any(|e| e == endpoint)
    }

    /// Resolves once the connection has been closed or exhausted.
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Add a member. Returns `None` if the connection is already terminal.
    pub(crate) fn attach(&self, id: &SubscriberId, endpoint: &str) -> Option<Attached> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return None;
        }
        let added = inner
            .subscribers
            .insert(id.clone(), endpoint.to_string())
            .is_none();
        Some(Attached {
            added,
            open: inner.state == ConnectionState::Open,
        })
    }

    /// Remove a member, returning the number left, or `None` if it was not a member.
    pub(crate) fn detach(&self, id: &SubscriberId) -> Option<usize> {
        let mut inner = self.lock();
        inner.subscribers.remove(id).map(|_| inner.subscribers.len())
    }

    /// Transport signalled open: reset the backoff and tell every member.
    ///
    /// Returns false if the connection was closed in the meantime.
    pub(crate) fn mark_open(&self, subscribers: &SubscriberRegistry) -> bool {
        let members = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = ConnectionState::Open;
            inner.retry_count = 0;
            inner.touch();
            inner.members()
        };

        tracing::info!(
            connection = %self.id,
            endpoint = %self.endpoint,
            subscribers = members.len(),
            "Stream connection open"
        );
        self.notify(&members, subscribers, Callbacks::connected);
        true
    }

    /// Parse one raw message and fan it out to every current member.
    ///
    /// Returns the number of subscribers that received it.
    pub(crate) fn deliver(&self, raw: RawMessage, subscribers: &SubscriberRegistry) -> usize {
        let envelope = Envelope::parse(&raw.data, raw.id, Utc::now());

        let members = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Open {
                return 0;
            }
            inner.touch();
            inner.members()
        };

        if let crate::envelope::EnvelopeKind::ParseError { error, .. } = &envelope.kind {
            tracing::warn!(
                connection = %self.id,
                endpoint = %self.endpoint,
                error = %error,
                "Unparseable stream payload"
            );
        }
        tracing::trace!(
            connection = %self.id,
            event_type = envelope.event_type(),
            subscribers = members.len(),
            "Delivering envelope"
        );

        self.notify(&members, subscribers, |callbacks| callbacks.event(&envelope))
    }

    /// Record a transport failure, tell every member, and decide what happens next.
    pub(crate) fn handle_error(
        &self,
        error: TransportError,
        backoff: &Backoff,
        subscribers: &SubscriberRegistry,
    ) -> ErrorOutcome {
        let (outcome, members) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return ErrorOutcome::Closed;
            }
            inner.touch();

            let outcome = match backoff.next_attempt(inner.retry_count) {
                Some(delay) => {
                    inner.retry_count += 1;
                    inner.state = ConnectionState::Connecting;
                    ErrorOutcome::Retry {
                        attempt: inner.retry_count,
                        delay,
                    }
                }
                None => {
                    inner.retry_count = inner.retry_count.saturating_add(1);
                    inner.state = ConnectionState::Exhausted;
                    ErrorOutcome::Exhausted {
                        attempts: inner.retry_count,
                    }
                }
            };
            (outcome, inner.members())
        };

        tracing::warn!(
            connection = %self.id,
            endpoint = %self.endpoint,
            error = %error,
            outcome = ?outcome,
            "Stream transport failed"
        );

        let error = StreamError::Transport(error);
        self.notify(&members, subscribers, |callbacks| callbacks.error(&error));
        outcome
    }

    /// Close for good: tell every member it is disconnected and stop the driver.
    ///
    /// Returns false if the connection was already terminal.
    pub(crate) fn close(&self, subscribers: &SubscriberRegistry) -> bool {
        let members = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = ConnectionState::Closed;
            std::mem::take(&mut inner.subscribers)
                .into_keys()
                .collect::<Vec<_>>()
        };
        self.closed.send_replace(true);

        tracing::info!(
            connection = %self.id,
            endpoint = %self.endpoint,
            subscribers = members.len(),
            "Stream connection closed"
        );
        for id in &members {
            if let Some(callbacks) = subscribers.get(id) {
                callbacks.disconnected();
            }
        }
        true
    }

    /// Final notification after `handle_error` returned `Exhausted`.
    pub(crate) fn finish_exhausted(&self, attempts: u32, subscribers: &SubscriberRegistry) {
        let members = {
            let mut inner = self.lock();
            std::mem::take(&mut inner.subscribers)
                .into_keys()
                .collect::<Vec<_>>()
        };
        self.closed.send_replace(true);

        tracing::warn!(
            connection = %self.id,
            endpoint = %self.endpoint,
            attempts,
            subscribers = members.len(),
            "Reconnection attempts exhausted, connection evicted"
        );

        let error = StreamError::RetriesExhausted {
            endpoint: self.endpoint.clone(),
            attempts,
        };
        for id in &members {
            if let Some(callbacks) = subscribers.get(id) {
                callbacks.error(&error);
                callbacks.disconnected();
            }
        }
    }

    pub(crate) fn view(&self) -> ConnectionView {
        let inner = self.lock();
        let mut endpoints: Vec<String> = inner.subscribers.values().cloned().collect();
        endpoints.push(self.endpoint.clone());
        endpoints.sort();
        endpoints.dedup();

        ConnectionView {
            state: inner.state,
            subscriber_count: inner.subscribers.len(),
            endpoints,
            last_activity: inner.last_activity_at,
            retry_count: inner.retry_count,
        }
    }

    /// Invoke `f` for each listed member that is still attached at dispatch time.
    fn notify(
        &self,
        members: &[SubscriberId],
        subscribers: &SubscriberRegistry,
        f: impl Fn(&Callbacks),
    ) -> usize {
        let mut notified = 0;
        for id in members {
            // Removed mid-delivery: skip.
            if !self.is_member(id) {
                continue;
            }
            if let Some(callbacks) = subscribers.get(id) {
                f(&callbacks);
                notified += 1;
            }
        }
        notified
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &inner.state)
            .field("subscribers", &inner.subscribers.len())
            .field("retry_count", &inner.retry_count)
            .finish()
    }
}
