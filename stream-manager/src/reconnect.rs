//! Reconnection with bounded exponential backoff.
//!
//! Every connection is driven by one task that owns its transport stream: open,
//! pump messages into the fan-out, and on failure wait
//! `min(base * 2^n, max)` before the next attempt, where `n` counts the earlier
//! failures. The failure that brings the retry count to `max_retries` without a
//! successful open exhausts the connection: its members are told and it is evicted.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;

use crate::config::ManagerConfig;
use crate::connection::{Connection, ErrorOutcome};
use crate::error::TransportError;
use crate::manager::Shared;

/// Backoff schedule for reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(
            config.base_reconnect_delay,
            config.max_reconnect_delay,
            config.max_retries,
        )
    }

    /// Delay before the attempt that follows `retry_count` earlier attempts.
    pub fn delay(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// The delay before retrying after a failure seen with `retry_count` earlier
    /// failures, or `None` when that failure brings the count to `max_retries`.
    pub fn next_attempt(&self, retry_count: u32) -> Option<Duration> {
        (retry_count.saturating_add(1) < self.max_retries).then(|| self.delay(retry_count))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Run a connection until it is closed or exhausted.
pub(crate) async fn drive(connection: Arc<Connection>, shared: Arc<Shared>) {
    let backoff = Backoff::from_config(&shared.config);
    let mut closed = connection.closed_signal();

    tracing::debug!(
        connection = %connection.id(),
        endpoint = %connection.endpoint(),
        "Connection driver started"
    );

    loop {
        let opened = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            result = shared.transport.open(connection.endpoint()) => result,
        };

        let failure = match opened {
            Ok(mut stream) => {
                if !connection.mark_open(&shared.subscribers) {
                    break;
                }
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = wait_closed(&mut closed) => return,
                        item = stream.next() => item,
                    };
                    match next {
                        Some(Ok(raw)) => {
                            connection.deliver(raw, &shared.subscribers);
                        }
                        Some(Err(e)) => break e,
                        None => break TransportError::Closed,
                    }
                }
                // The stream is dropped here, before any backoff wait.
            }
            Err(e) => e,
        };

        match connection.handle_error(failure, &backoff, &shared.subscribers) {
            ErrorOutcome::Closed => break,
            ErrorOutcome::Exhausted { attempts } => {
                shared.connections.remove(connection.id());
                connection.finish_exhausted(attempts, &shared.subscribers);
                break;
            }
            ErrorOutcome::Retry { attempt, delay } => {
                tracing::debug!(
                    connection = %connection.id(),
                    endpoint = %connection.endpoint(),
                    attempt,
                    max_retries = backoff.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnection"
                );

                tokio::select! {
                    biased;
                    _ = wait_closed(&mut closed) => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                if shared.connections.remove_if_empty(connection.id()) {
                    tracing::debug!(
                        connection = %connection.id(),
                        "No subscribers left, skipping reconnection"
                    );
                    connection.close(&shared.subscribers);
                    break;
                }
            }
        }
    }

    tracing::debug!(connection = %connection.id(), "Connection driver stopped");
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives as long as the connection, which outlives this task.
    let _ = closed.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_backoff() -> Backoff {
        Backoff::from_config(&ManagerConfig::default())
    }

    #[test]
    fn test_delay_schedule() {
        let backoff = default_backoff();
        let delays: Vec<u64> = (0..7).map(|n| backoff.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_next_attempt_stops_at_max_retries() {
        let backoff = default_backoff();
        let delays: Vec<u64> = (0..4)
            .map(|n| backoff.next_attempt(n).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);

        // The fifth failure is the last.
        assert_eq!(backoff.next_attempt(4), None);
        assert_eq!(backoff.next_attempt(5), None);
    }

    #[test]
    fn test_zero_or_one_retries_never_reconnects() {
        for max_retries in [0, 1] {
            let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), max_retries);
            assert_eq!(backoff.next_attempt(0), None);
        }
    }

    #[test]
    fn test_huge_retry_count_saturates() {
        let backoff = default_backoff();
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn delay_is_capped_and_non_decreasing(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..120_000,
            n in 0u32..64,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(base_ms + extra_ms);
            let backoff = Backoff::new(base, max, 10);

            prop_assert!(backoff.delay(n) <= max);
            prop_assert!(backoff.delay(n) >= base);
            prop_assert!(backoff.delay(n) <= backoff.delay(n + 1));
        }
    }
}
