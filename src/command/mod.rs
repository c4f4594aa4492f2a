//! # Command Module
//!
//! Control commands sent to the drone and their acknowledgments.
//!
//! Only a stub dispatcher exists: it acknowledges commands without a real
//! uplink. Its one obligation is to honor connectivity, rejecting every
//! command while the poller is not connected.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TelemetryError};
use crate::poller::DashboardState;
use crate::telemetry::fragment::lenient_f64;
use crate::telemetry::snapshot::FALLBACK_DRONE_ID;

/// Takeoff altitude used when none is given, meters
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f64 = 10.0;

/// Highest accepted takeoff altitude, meters
pub const MAX_TAKEOFF_ALTITUDE_M: f64 = 120.0;

/// Optional command parameters
pub type CommandParams = Map<String, Value>;

/// Control command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Arm,
    Disarm,
    Takeoff,
    Land,
    Rtl,
    Loiter,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Arm => "ARM",
            Command::Disarm => "DISARM",
            Command::Takeoff => "TAKEOFF",
            Command::Land => "LAND",
            Command::Rtl => "RTL",
            Command::Loiter => "LOITER",
        };
        f.write_str(name)
    }
}

impl FromStr for Command {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARM" => Ok(Command::Arm),
            "DISARM" => Ok(Command::Disarm),
            "TAKEOFF" => Ok(Command::Takeoff),
            "LAND" => Ok(Command::Land),
            "RTL" => Ok(Command::Rtl),
            "LOITER" => Ok(Command::Loiter),
            other => Err(TelemetryError::Command(format!("unknown command '{}'", other))),
        }
    }
}

/// Acknowledgment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Accepted,
    Rejected,
    Executed,
}

/// Acknowledgment returned for every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub command_id: Uuid,
    pub drone_id: String,
    pub command: Command,
    pub status: CommandStatus,
    pub message: String,
}

/// Sends commands to a drone
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn send(&self, command: Command, params: Option<CommandParams>) -> Result<CommandAck>;
}

/// Dispatcher that acknowledges without an uplink, gated on connectivity
#[derive(Debug, Clone)]
pub struct StubDispatcher {
    state: watch::Receiver<DashboardState>,
}

impl StubDispatcher {
    pub fn new(state: watch::Receiver<DashboardState>) -> Self {
        Self { state }
    }

    /// Whether commands would currently be accepted
    pub fn enabled(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

fn takeoff_altitude(params: Option<&CommandParams>) -> std::result::Result<f64, String> {
    let Some(raw) = params.and_then(|p| p.get("altitude")) else {
        return Ok(DEFAULT_TAKEOFF_ALTITUDE_M);
    };

    match lenient_f64(raw) {
        Some(alt) if alt > 0.0 && alt <= MAX_TAKEOFF_ALTITUDE_M => Ok(alt),
        _ => Err(format!(
            "takeoff altitude must be between 0 and {} m",
            MAX_TAKEOFF_ALTITUDE_M
        )),
    }
}

#[async_trait]
impl CommandDispatcher for StubDispatcher {
    async fn send(&self, command: Command, params: Option<CommandParams>) -> Result<CommandAck> {
        let (connected, drone_id) = {
            let state = self.state.borrow();
            let drone_id = state
                .telemetry
                .as_ref()
                .map(|t| t.drone_id.clone())
                .unwrap_or_else(|| FALLBACK_DRONE_ID.to_string());
            (state.is_connected(), drone_id)
        };

        let (status, message) = if !connected {
            (CommandStatus::Rejected, "Not connected to drone".to_string())
        } else if command == Command::Takeoff {
            match takeoff_altitude(params.as_ref()) {
                Ok(alt) => (
                    CommandStatus::Accepted,
                    format!("Command TAKEOFF accepted (altitude {} m)", alt),
                ),
                Err(reason) => (CommandStatus::Rejected, reason),
            }
        } else {
            (CommandStatus::Accepted, format!("Command {} accepted", command))
        };

        let ack = CommandAck {
            command_id: Uuid::new_v4(),
            drone_id,
            command,
            status,
            message,
        };

        info!(command = %ack.command, status = ?ack.status, drone_id = %ack.drone_id, "Command acknowledged");
        Ok(ack)
    }
}
