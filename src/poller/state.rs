//! # Dashboard State
//!
//! The single published cell the poller writes and every consumer reads.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::telemetry::Telemetry;

/// Connectivity as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started yet
    Idle,
    /// First cycle in progress
    Polling,
    /// Last cycle reached the store
    Connected,
    /// Last cycle failed to reach the store
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Polling => "polling",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Everything a dashboard renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    /// Last known good snapshot. Never cleared by an empty or failed cycle.
    pub telemetry: Option<Telemetry>,

    pub connection: ConnectionState,

    /// Message of the most recent failure, cleared on the next good cycle
    pub last_error: Option<String>,

    /// Sequence number of the last applied cycle, 0 before the first
    pub cycle: u64,

    /// Wall-clock time the snapshot was last replaced, epoch milliseconds
    pub updated_at: Option<i64>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            telemetry: None,
            connection: ConnectionState::Idle,
            last_error: None,
            cycle: 0,
            updated_at: None,
        }
    }
}

impl DashboardState {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// True until the first cycle has completed
    pub fn is_loading(&self) -> bool {
        matches!(self.connection, ConnectionState::Idle | ConnectionState::Polling)
    }

    /// Whether the retained snapshot is older than `stale_after`
    ///
    /// Age is measured from the producer timestamp. No snapshot is not stale.
    pub fn is_stale(&self, now_ms: i64, stale_after: Duration) -> bool {
        match &self.telemetry {
            Some(telemetry) => telemetry.age_ms(now_ms) as u128 > stale_after.as_millis(),
            None => false,
        }
    }
}
