//! # Telemetry Fragments
//!
//! One raw, partial, independently timestamped unit of telemetry as stored by
//! the ingestion side. Fragments are read-only here; newer fragments of the
//! same kind supersede older ones, nothing is ever merged in place.
//!
//! Payloads arrive as loosely typed key/value maps. Numbers may be encoded as
//! JSON numbers or strings (`"12.5"`), booleans as bools, numbers or strings.
//! Every extractor degrades to `None` instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Battery fragment kind
pub const KIND_BATTERY: &str = "battery";

/// Altitude fragment kind
pub const KIND_ALTITUDE: &str = "altitude";

/// Vehicle state (armed + mode) fragment kind
pub const KIND_STATE: &str = "state";

/// Kinds the fusion engine knows how to read.
///
/// The batch scan stops early once each of these has been seen; kinds added
/// later are not part of this set.
pub const KNOWN_KINDS: [&str; 3] = [KIND_BATTERY, KIND_ALTITUDE, KIND_STATE];

/// Kind reported for records without a `data.type` field
pub const KIND_UNKNOWN: &str = "unknown";

/// Battery reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryReading {
    /// Remaining charge in percent, when the autopilot estimates it
    pub remaining: Option<f64>,

    /// Pack voltage in volts
    pub voltage: Option<f64>,
}

/// Altitude reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AltitudeReading {
    /// Altitude relative to the home position in meters
    pub relative: Option<f64>,

    /// Altitude above mean sea level in meters
    pub amsl: Option<f64>,
}

/// Armed state and flight mode reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateReading {
    pub armed: Option<bool>,

    /// Numeric autopilot mode code
    pub mode: Option<i64>,
}

/// Kind-specific payload of a fragment
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentPayload {
    Battery(BatteryReading),
    Altitude(AltitudeReading),
    State(StateReading),
    /// Any kind fusion does not read. Kept so the kind stays visible.
    Other { kind: String },
}

impl FragmentPayload {
    /// Kind string of this payload
    pub fn kind(&self) -> &str {
        match self {
            FragmentPayload::Battery(_) => KIND_BATTERY,
            FragmentPayload::Altitude(_) => KIND_ALTITUDE,
            FragmentPayload::State(_) => KIND_STATE,
            FragmentPayload::Other { kind } => kind,
        }
    }
}

/// One typed, timestamped partial telemetry record
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFragment {
    /// Producer-assigned timestamp, epoch milliseconds
    pub timestamp: i64,

    /// MAVLink system id of the producing vehicle, if recorded
    pub source_id: Option<u32>,

    pub payload: FragmentPayload,
}

impl TelemetryFragment {
    pub fn new(timestamp: i64, payload: FragmentPayload) -> Self {
        Self {
            timestamp,
            source_id: None,
            payload,
        }
    }

    /// Attach the producing system id
    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }
}

/// Raw item as returned by the key-value store
///
/// Shape: `{ timestamp, sysid?, compid?, data: { type, timestamp, ... } }`.
/// Every field is optional so that a single bad item never fails a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub timestamp: Option<Value>,

    #[serde(default)]
    pub sysid: Option<Value>,

    #[serde(default)]
    pub compid: Option<Value>,

    #[serde(default)]
    pub data: Value,
}

impl RawRecord {
    /// Build a record from an arbitrary JSON value
    ///
    /// Non-object values yield an empty record of kind `unknown`.
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        serde_json::from_value(value).unwrap_or_default()
    }

    /// The `data.type` field, or `unknown`
    pub fn kind(&self) -> &str {
        self.data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(KIND_UNKNOWN)
    }

    /// `data.timestamp` if present, else the record timestamp, else 0
    pub fn effective_timestamp(&self) -> i64 {
        self.data
            .get("timestamp")
            .and_then(lenient_i64)
            .or_else(|| self.timestamp.as_ref().and_then(lenient_i64))
            .unwrap_or(0)
    }

    fn field(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|name| self.data.get(*name))
    }

    /// Convert into a typed fragment. Missing or malformed fields become `None`.
    pub fn to_fragment(&self) -> TelemetryFragment {
        let payload = match self.kind() {
            KIND_BATTERY => FragmentPayload::Battery(BatteryReading {
                // MAVLink reports -1 when the autopilot does not estimate charge
                remaining: self
                    .field(&["remaining", "battery_remaining"])
                    .and_then(lenient_f64)
                    .filter(|r| *r >= 0.0),
                voltage: self.field(&["voltage"]).and_then(lenient_f64),
            }),
            KIND_ALTITUDE => FragmentPayload::Altitude(AltitudeReading {
                relative: self
                    .field(&["relative", "altitude_relative"])
                    .and_then(lenient_f64),
                amsl: self.field(&["amsl", "altitude_amsl"]).and_then(lenient_f64),
            }),
            KIND_STATE => FragmentPayload::State(StateReading {
                armed: self.field(&["armed"]).and_then(lenient_bool),
                mode: self.field(&["mode", "custom_mode"]).and_then(lenient_i64),
            }),
            other => FragmentPayload::Other {
                kind: other.to_string(),
            },
        };

        TelemetryFragment {
            timestamp: self.effective_timestamp(),
            source_id: self
                .sysid
                .as_ref()
                .and_then(lenient_i64)
                .and_then(|id| u32::try_from(id).ok()),
            payload,
        }
    }
}

/// Read a finite float from a number or numeric string
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Read an integer from a number or numeric string. Integral floats are accepted.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| lenient_f64(&Value::String(s.to_string())).and_then(|f| {
                    if f.fract() == 0.0 { Some(f as i64) } else { None }
                }))
        }
        _ => None,
    }
}

/// Read a boolean from a bool, a number (non-zero is true) or a string
pub fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
