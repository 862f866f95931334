//! Read-only status snapshots for diagnostics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::{ConnectionId, ConnectionState};
use crate::registry::ConnectionRegistry;

/// Status of one physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    /// The physical endpoint being streamed
    pub endpoint: String,
    /// Every logical endpoint currently served by this connection, sorted
    pub endpoints: Vec<String>,
    pub subscriber_count: usize,
    pub state: ConnectionState,
    pub last_activity: DateTime<Utc>,
    pub retry_count: u32,
    /// True when the connection serves endpoints other than its own because the
    /// connection ceiling was reached
    pub shared: bool,
}

/// Point-in-time view of the whole manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub active_connections: usize,
    pub total_subscribers: usize,
    pub max_connections: usize,
    pub connections: Vec<ConnectionStatus>,
}

impl StatusSnapshot {
    /// Collect a snapshot without mutating anything.
    pub(crate) fn collect(registry: &ConnectionRegistry, total_subscribers: usize) -> Self {
        let connections: Vec<ConnectionStatus> = registry
            .connections()
            .iter()
            .map(|connection| {
                let view = connection.view();
                ConnectionStatus {
                    id: connection.id(),
                    endpoint: connection.endpoint().to_string(),
                    shared: view.endpoints.len() > 1,
                    endpoints: view.endpoints,
                    subscriber_count: view.subscriber_count,
                    state: view.state,
                    last_activity: view.last_activity,
                    retry_count: view.retry_count,
                }
            })
            .collect();

        Self {
            active_connections: connections.len(),
            total_subscribers,
            max_connections: registry.max_connections(),
            connections,
        }
    }

    /// The connection serving the physical endpoint `endpoint`.
    pub fn connection(&self, endpoint: &str) -> Option<&ConnectionStatus> {
        self.connections.iter().find(|c| c.endpoint == endpoint)
    }

    /// The connection a logical endpoint is routed to, shared or not.
    pub fn serving(&self, endpoint: &str) -> Option<&ConnectionStatus> {
        self.connections
            .iter()
            .find(|c| c.endpoints.iter().any(|e| e == endpoint))
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stream Manager Status:")?;
        writeln!(
            f,
            "  Connections: {}/{}",
            self.active_connections, self.max_connections
        )?;
        writeln!(f, "  Subscribers: {}", self.total_subscribers)?;
        for c in &self.connections {
            writeln!(
                f,
                "    {} {} [{}] subscribers={} retries={}{}",
                c.id,
                c.endpoint,
                c.state,
                c.subscriber_count,
                c.retry_count,
                if c.shared {
                    format!(" shared-by={}", c.endpoints.join(","))
                } else {
                    String::new()
                }
            )?;
        }
        Ok(())
    }
}
