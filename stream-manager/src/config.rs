//! Configuration for the stream manager.
//!
//! All values are fixed once a [`StreamManager`](crate::StreamManager) is built.

use std::time::Duration;

use crate::error::{ManagerError, Result};

/// Default ceiling on concurrent physical connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;
/// Default base delay for reconnection backoff.
pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Default upper bound for reconnection backoff.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);
/// Default number of consecutive failures after which a connection is given up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default period of the idle sweep.
pub const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_millis(60_000);
/// Default inactivity after which an empty connection is reaped.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(300_000);

/// Configuration for the StreamManager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of live physical connections. Once reached, new endpoints
    /// share the busiest existing connection.
    /// Default: 4
    pub max_connections: usize,

    /// Backoff base: the delay before the first reconnection attempt
    /// Default: 1 second
    pub base_reconnect_delay: Duration,

    /// Backoff cap
    /// Default: 30 seconds
    pub max_reconnect_delay: Duration,

    /// Consecutive failed opens or streams before the connection is given up
    /// Default: 5
    pub max_retries: u32,

    /// How often the idle reaper runs
    /// Default: 60 seconds
    pub idle_sweep_interval: Duration,

    /// How long an empty connection may sit without activity before it is reaped
    /// Default: 5 minutes
    pub idle_threshold: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            base_reconnect_delay: DEFAULT_BASE_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            idle_sweep_interval: DEFAULT_IDLE_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

impl ManagerConfig {
    /// Create a new ManagerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ManagerConfig that gives up quickly, for kiosk displays where a
    /// stale view is worse than an error banner
    pub fn fail_fast() -> Self {
        Self {
            base_reconnect_delay: Duration::from_millis(250),
            max_reconnect_delay: Duration::from_secs(5),
            max_retries: 3,
            ..Default::default()
        }
    }

    /// Create a ManagerConfig for hosts with a tight connection budget
    /// (e.g. HTTP/1.1 browsers capped at six connections per origin)
    pub fn resource_efficient() -> Self {
        Self {
            max_connections: 2,
            idle_sweep_interval: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ManagerError::Configuration(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if self.base_reconnect_delay == Duration::ZERO {
            return Err(ManagerError::Configuration(
                "Base reconnect delay must be greater than 0".to_string(),
            ));
        }

        if self.base_reconnect_delay > self.max_reconnect_delay {
            return Err(ManagerError::Configuration(
                "Invalid reconnect delay: base must not exceed max".to_string(),
            ));
        }

        if self.idle_sweep_interval == Duration::ZERO {
            return Err(ManagerError::Configuration(
                "Idle sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.base_reconnect_delay = base;
        self.max_reconnect_delay = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_idle_sweep(mut self, interval: Duration, threshold: Duration) -> Self {
        self.idle_sweep_interval = interval;
        self.idle_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.base_reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_delay, Duration::from_millis(30_000));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.idle_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.idle_threshold, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let no_connections = ManagerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(no_connections.validate().is_err());

        let inverted_delay = ManagerConfig::default()
            .with_reconnect_delay(Duration::from_secs(60), Duration::from_secs(1));
        assert!(inverted_delay.validate().is_err());

        let zero_sweep = ManagerConfig::default().with_idle_sweep(Duration::ZERO, Duration::ZERO);
        assert!(zero_sweep.validate().is_err());

        // Zero retries is allowed: the first failure is final.
        assert!(ManagerConfig::default().with_max_retries(0).validate().is_ok());
    }

    #[test]
    fn test_config_presets() {
        let fast = ManagerConfig::fail_fast();
        assert_eq!(fast.max_retries, 3);
        assert!(fast.validate().is_ok());

        let efficient = ManagerConfig::resource_efficient();
        assert_eq!(efficient.max_connections, 2);
        assert!(efficient.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ManagerConfig::new()
            .with_max_connections(1)
            .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(80))
            .with_max_retries(2)
            .with_idle_sweep(Duration::from_secs(1), Duration::from_secs(2));

        assert_eq!(config.max_connections, 1);
        assert_eq!(config.max_reconnect_delay, Duration::from_millis(80));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.idle_threshold, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }
}
