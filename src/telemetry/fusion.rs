//! # Fusion Engine
//!
//! Reduces a batch of fragments to one total [`Telemetry`] snapshot.
//!
//! Rules:
//! - Per kind, only the fragment with the highest timestamp counts (first one
//!   wins on ties).
//! - Each field degrades to its default independently of the others.
//! - `timestamp` is the newest producer timestamp in the batch. The wall clock
//!   is only read when the batch is empty.
//! - `drone_id` comes from the newest selected fragment carrying a source id,
//!   the earliest in input order on ties.

use std::collections::BTreeMap;

use super::fragment::{
    AltitudeReading, BatteryReading, FragmentPayload, StateReading, TelemetryFragment,
};
use super::snapshot::{
    FlightMode, Position, Telemetry, DEFAULT_BATTERY_PERCENT, FALLBACK_DRONE_ID,
    UNKNOWN_FLIGHT_MODE,
};

/// Voltage treated as an empty pack (4S LiPo, 3.0 V/cell)
pub const VOLTAGE_EMPTY: f64 = 12.0;

/// Voltage treated as a full pack (4S LiPo, 4.05 V/cell)
pub const VOLTAGE_FULL: f64 = 16.2;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Keep the newest fragment of each kind
///
/// Returns references into `fragments`, keyed by kind.
pub fn latest_per_kind(fragments: &[TelemetryFragment]) -> BTreeMap<&str, &TelemetryFragment> {
    let mut latest: BTreeMap<&str, &TelemetryFragment> = BTreeMap::new();
    for fragment in fragments {
        latest
            .entry(fragment.kind())
            .and_modify(|current| {
                if fragment.timestamp > current.timestamp {
                    *current = fragment;
                }
            })
            .or_insert(fragment);
    }
    latest
}

/// Battery percentage from a reading
///
/// `remaining` wins when present. Otherwise voltage is mapped linearly from
/// 12.0 V (0 %) to 16.2 V (100 %). With neither, the pack is assumed full.
pub fn battery_percent(reading: &BatteryReading) -> f64 {
    if let Some(remaining) = reading.remaining {
        return remaining.clamp(0.0, 100.0);
    }

    match reading.voltage {
        Some(voltage) => {
            let percent = (voltage - VOLTAGE_EMPTY) / (VOLTAGE_FULL - VOLTAGE_EMPTY) * 100.0;
            percent.clamp(0.0, 100.0)
        }
        None => DEFAULT_BATTERY_PERCENT,
    }
}

/// Altitude from a reading, relative preferred over AMSL
pub fn altitude_meters(reading: &AltitudeReading) -> f64 {
    reading.relative.or(reading.amsl).unwrap_or(0.0)
}

fn flight_mode_name(reading: &StateReading) -> String {
    reading
        .mode
        .map(|code| FlightMode::from_code(code).to_string())
        .unwrap_or_else(|| UNKNOWN_FLIGHT_MODE.to_string())
}

fn newest_source_id(
    fragments: &[TelemetryFragment],
    latest: &BTreeMap<&str, &TelemetryFragment>,
) -> Option<u32> {
    let mut newest: Option<(i64, u32)> = None;
    for fragment in fragments {
        let selected = latest
            .get(fragment.kind())
            .is_some_and(|chosen| std::ptr::eq(*chosen, fragment));
        let Some(id) = fragment.source_id.filter(|_| selected) else {
            continue;
        };
        if newest.map_or(true, |(ts, _)| fragment.timestamp > ts) {
            newest = Some((fragment.timestamp, id));
        }
    }
    newest.map(|(_, id)| id)
}

/// Fuse a fragment batch into a snapshot
///
/// Pure apart from the empty-batch timestamp fallback.
pub fn fuse(fragments: &[TelemetryFragment]) -> Telemetry {
    let timestamp = fragments
        .iter()
        .map(|f| f.timestamp)
        .max()
        .unwrap_or_else(now_millis);

    let mut telemetry = Telemetry::defaults_at(timestamp);
    let latest = latest_per_kind(fragments);

    for fragment in latest.values() {
        match &fragment.payload {
            FragmentPayload::Battery(reading) => {
                telemetry.battery = battery_percent(reading);
            }
            FragmentPayload::Altitude(reading) => {
                telemetry.position = Position {
                    alt: altitude_meters(reading),
                    ..Position::default()
                };
            }
            FragmentPayload::State(reading) => {
                telemetry.armed = reading.armed.unwrap_or(false);
                telemetry.flight_mode = flight_mode_name(reading);
                telemetry.has_state_data = true;
            }
            FragmentPayload::Other { .. } => {}
        }
    }

    telemetry.drone_id = match newest_source_id(fragments, &latest) {
        Some(id) => format!("drone-{}", id),
        None => FALLBACK_DRONE_ID.to_string(),
    };

    telemetry
}
