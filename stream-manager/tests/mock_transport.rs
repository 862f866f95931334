//! Scripted transport for integration tests.
//!
//! Every `open` is recorded with the (tokio) time it happened. Opens succeed unless
//! the endpoint was told to fail; a successful open hands back a stream fed by a
//! channel the test drives through [`MockTransport::send`] and friends.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use stream_manager::{RawMessage, Transport, TransportError, TransportStream};
use tokio::time::Instant;

type Feed = mpsc::UnboundedSender<Result<RawMessage, TransportError>>;

#[derive(Default)]
struct MockState {
    opens: Vec<(String, Instant)>,
    failing: HashSet<String>,
    fail_next: HashMap<String, usize>,
    feeds: HashMap<String, Feed>,
}

/// Cloneable handle; clones share the same script and records.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open of `endpoint` fails until [`MockTransport::heal`].
    pub fn always_fail(&self, endpoint: &str) {
        self.lock().failing.insert(endpoint.to_string());
    }

    /// The next `count` opens of `endpoint` fail.
    pub fn fail_next(&self, endpoint: &str, count: usize) {
        self.lock().fail_next.insert(endpoint.to_string(), count);
    }

    pub fn heal(&self, endpoint: &str) {
        let mut state = self.lock();
        state.failing.remove(endpoint);
        state.fail_next.remove(endpoint);
    }

    /// Push a payload into the current stream for `endpoint`.
    ///
    /// Returns false when no stream is open or its receiver is gone.
    pub fn send(&self, endpoint: &str, data: &str) -> bool {
        self.push(endpoint, Ok(RawMessage::new(data)))
    }

    pub fn send_with_id(&self, endpoint: &str, data: &str, id: &str) -> bool {
        self.push(endpoint, Ok(RawMessage::new(data).with_id(id)))
    }

    /// Fail the current stream for `endpoint` with a runtime error.
    pub fn break_stream(&self, endpoint: &str, reason: &str) -> bool {
        self.push(endpoint, Err(TransportError::Stream(reason.to_string())))
    }

    /// End the current stream for `endpoint` as if the server hung up.
    pub fn end_stream(&self, endpoint: &str) {
        self.lock().feeds.remove(endpoint);
    }

    /// True once the manager has dropped the stream it was given for `endpoint`.
    pub fn stream_dropped(&self, endpoint: &str) -> bool {
        self.lock()
            .feeds
            .get(endpoint)
            .map_or(true, |feed| feed.is_closed())
    }

    pub fn open_count(&self, endpoint: &str) -> usize {
        self.lock().opens.iter().filter(|(e, _)| e == endpoint).count()
    }

    pub fn total_opens(&self) -> usize {
        self.lock().opens.len()
    }

    pub fn open_times(&self, endpoint: &str) -> Vec<Instant> {
        self.lock()
            .opens
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, at)| *at)
            .collect()
    }

    fn push(&self, endpoint: &str, item: Result<RawMessage, TransportError>) -> bool {
        match self.lock().feeds.get(endpoint) {
            Some(feed) => feed.unbounded_send(item).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportStream, TransportError> {
        let mut state = self.lock();
        state.opens.push((endpoint.to_string(), Instant::now()));

        if state.failing.contains(endpoint) {
            return Err(TransportError::Open(format!("{endpoint} unreachable")));
        }
        if let Some(remaining) = state.fail_next.get_mut(endpoint) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Open(format!("{endpoint} unreachable")));
            }
        }

        let (tx, rx) = mpsc::unbounded();
        state.feeds.insert(endpoint.to_string(), tx);
        Ok(rx.boxed())
    }
}
