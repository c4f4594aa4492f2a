//! # Telemetry Snapshot
//!
//! The fused, always-total view of a drone that consumers read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Drone id used when no fragment carries a system id
pub const FALLBACK_DRONE_ID: &str = "drone-001";

/// Latitude used while no GPS fragment kind exists
pub const FALLBACK_LATITUDE: f64 = 37.7749;

/// Longitude used while no GPS fragment kind exists
pub const FALLBACK_LONGITUDE: f64 = -122.4194;

/// Battery percentage reported when neither charge nor voltage was observed
pub const DEFAULT_BATTERY_PERCENT: f64 = 100.0;

/// Flight mode reported when no mode code was observed
pub const UNKNOWN_FLIGHT_MODE: &str = "UNKNOWN";

/// Position in WGS84 degrees and meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            lat: FALLBACK_LATITUDE,
            lon: FALLBACK_LONGITUDE,
            alt: 0.0,
        }
    }
}

/// Velocity in m/s. No fragment kind supplies it yet, so it is always zero-filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

/// Attitude in degrees. Zero-filled, like [`Velocity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// ArduCopter flight modes reachable from the `state` fragment's mode code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Stabilize,
    Acro,
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Circle,
    Land,
    OfLoiter,
    Takeoff,
    Unknown(i64),
}

impl FlightMode {
    /// Map a numeric mode code. Codes outside the table are kept as `Unknown(n)`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => FlightMode::Stabilize,
            1 => FlightMode::Acro,
            2 => FlightMode::AltHold,
            3 => FlightMode::Auto,
            4 => FlightMode::Guided,
            5 => FlightMode::Loiter,
            6 => FlightMode::Rtl,
            7 => FlightMode::Circle,
            8 => FlightMode::Land,
            9 => FlightMode::OfLoiter,
            10 => FlightMode::Takeoff,
            n => FlightMode::Unknown(n),
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Acro => "ACRO",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::Circle => "CIRCLE",
            FlightMode::Land => "LAND",
            FlightMode::OfLoiter => "OF_LOITER",
            FlightMode::Takeoff => "TAKEOFF",
            FlightMode::Unknown(n) => return write!(f, "MODE_{}", n),
        };
        f.write_str(name)
    }
}

/// Fused telemetry snapshot
///
/// Every field always has a value. Where a value was defaulted rather than
/// observed, the provenance is kept next to it: `armed` is only meaningful
/// when `has_state_data` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub drone_id: String,

    /// Newest producer timestamp among the fragments fused, epoch milliseconds
    pub timestamp: i64,

    pub position: Position,
    pub velocity: Velocity,
    pub attitude: Attitude,

    /// Battery charge, 0-100 %
    pub battery: f64,

    pub flight_mode: String,
    pub armed: bool,

    /// True only if a `state` fragment was observed
    pub has_state_data: bool,
}

impl Telemetry {
    /// Snapshot with every field at its default, stamped with `timestamp`
    pub fn defaults_at(timestamp: i64) -> Self {
        Self {
            drone_id: FALLBACK_DRONE_ID.to_string(),
            timestamp,
            position: Position::default(),
            velocity: Velocity::default(),
            attitude: Attitude::default(),
            battery: DEFAULT_BATTERY_PERCENT,
            flight_mode: UNKNOWN_FLIGHT_MODE.to_string(),
            armed: false,
            has_state_data: false,
        }
    }

    /// Armed state as observed, `None` when no state fragment arrived
    pub fn observed_armed(&self) -> Option<bool> {
        self.has_state_data.then_some(self.armed)
    }

    /// Age of the snapshot relative to `now_ms`. Never negative.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_table() {
        let expected = [
            (0, "STABILIZE"),
            (1, "ACRO"),
            (2, "ALT_HOLD"),
            (3, "AUTO"),
            (4, "GUIDED"),
            (5, "LOITER"),
            (6, "RTL"),
            (7, "CIRCLE"),
            (8, "LAND"),
            (9, "OF_LOITER"),
            (10, "TAKEOFF"),
        ];
        for (code, name) in expected {
            assert_eq!(FlightMode::from_code(code).to_string(), name);
        }
    }

    #[test]
    fn test_unknown_mode_code() {
        assert_eq!(FlightMode::from_code(99), FlightMode::Unknown(99));
        assert_eq!(FlightMode::from_code(99).to_string(), "MODE_99");
        assert_eq!(FlightMode::from_code(-3).to_string(), "MODE_-3");
    }

    #[test]
    fn test_observed_armed_respects_trust_flag() {
        let mut telemetry = Telemetry::defaults_at(0);
        assert_eq!(telemetry.observed_armed(), None);
        assert!(!telemetry.armed);

        telemetry.has_state_data = true;
        assert_eq!(telemetry.observed_armed(), Some(false));
    }

    #[test]
    fn test_age_ms_clamps_future_timestamps() {
        let telemetry = Telemetry::defaults_at(1_000);
        assert_eq!(telemetry.age_ms(1_500), 500);
        assert_eq!(telemetry.age_ms(900), 0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(Telemetry::defaults_at(42)).unwrap();
        assert_eq!(json["droneId"], FALLBACK_DRONE_ID);
        assert_eq!(json["hasStateData"], false);
        assert_eq!(json["flightMode"], UNKNOWN_FLIGHT_MODE);
        assert_eq!(json["velocity"]["vz"], 0.0);
        assert_eq!(json["position"]["lat"], FALLBACK_LATITUDE);
    }
}
