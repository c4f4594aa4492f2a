//! # Simulated Source
//!
//! Deterministic drone flight for running the poller without any store.
//!
//! Each fetch advances one step through a fixed mission: idle on the ground,
//! take off, climb, loiter, return to launch, land, disarm. Battery drains
//! while armed. The first few steps deliberately omit the `state` fragment so
//! consumers see untrusted armed state before the vehicle reports in.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{FetchResult, TelemetrySource};
use crate::telemetry::fragment::{
    AltitudeReading, BatteryReading, FragmentPayload, StateReading, TelemetryFragment,
};
use crate::telemetry::fusion::{now_millis, VOLTAGE_EMPTY, VOLTAGE_FULL};

/// Steps before the first `state` fragment is emitted
pub const STATE_WARMUP_STEPS: u64 = 2;

/// Steps in one full mission
pub const MISSION_STEPS: u64 = 60;

const CRUISE_ALTITUDE_M: f64 = 30.0;
const CLIMB_RATE_M: f64 = 3.0;
const DRAIN_PER_STEP: f64 = 0.5;
const HOME_AMSL_M: f64 = 16.0;

/// Mode codes used by the mission
const MODE_STABILIZE: i64 = 0;
const MODE_LOITER: i64 = 5;
const MODE_RTL: i64 = 6;
const MODE_LAND: i64 = 8;
const MODE_TAKEOFF: i64 = 10;

/// One step of simulated vehicle state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedStep {
    pub armed: bool,
    pub mode: i64,
    pub altitude: f64,
    pub battery: f64,
}

/// Vehicle state at a mission step
pub fn mission_step(step: u64) -> SimulatedStep {
    let phase = step % MISSION_STEPS;
    let flights = step / MISSION_STEPS;

    let (armed, mode, altitude) = match phase {
        0..=4 => (false, MODE_STABILIZE, 0.0),
        5..=14 => (
            true,
            MODE_TAKEOFF,
            ((phase - 4) as f64 * CLIMB_RATE_M).min(CRUISE_ALTITUDE_M),
        ),
        15..=39 => (true, MODE_LOITER, CRUISE_ALTITUDE_M),
        40..=49 => (
            true,
            MODE_RTL,
            (CRUISE_ALTITUDE_M - (phase - 39) as f64 * CLIMB_RATE_M / 2.0).max(5.0),
        ),
        50..=54 => (true, MODE_LAND, (5.0 - (phase - 49) as f64).max(0.0)),
        _ => (false, MODE_STABILIZE, 0.0),
    };

    // Armed steps in each completed flight plus armed steps so far in this one
    let armed_per_flight = 50.0;
    let armed_so_far = phase.saturating_sub(4).min(50) as f64;
    let drained = (flights as f64 * armed_per_flight + armed_so_far) * DRAIN_PER_STEP;

    SimulatedStep {
        armed,
        mode,
        altitude,
        battery: (100.0 - drained).max(0.0),
    }
}

/// Source that replays the mission one step per fetch
#[derive(Debug)]
pub struct SimulatedSource {
    system_id: u32,
    step: AtomicU64,
}

impl SimulatedSource {
    pub fn new(system_id: u32) -> Self {
        Self {
            system_id,
            step: AtomicU64::new(0),
        }
    }

    /// Fragments for a given step, stamped at `now`
    pub fn fragments_at(&self, step: u64, now: i64) -> Vec<TelemetryFragment> {
        let state = mission_step(step);
        let voltage = VOLTAGE_EMPTY + (VOLTAGE_FULL - VOLTAGE_EMPTY) * state.battery / 100.0;

        let mut fragments = vec![
            TelemetryFragment::new(
                now - 40,
                FragmentPayload::Battery(BatteryReading {
                    // Even steps report charge, odd steps only voltage
                    remaining: (step % 2 == 0).then_some(state.battery.round()),
                    voltage: Some(voltage),
                }),
            ),
            TelemetryFragment::new(
                now - 20,
                FragmentPayload::Altitude(AltitudeReading {
                    relative: Some(state.altitude),
                    amsl: Some(HOME_AMSL_M + state.altitude),
                }),
            ),
        ];

        if step >= STATE_WARMUP_STEPS {
            fragments.push(TelemetryFragment::new(
                now,
                FragmentPayload::State(StateReading {
                    armed: Some(state.armed),
                    mode: Some(state.mode),
                }),
            ));
        }

        fragments
            .into_iter()
            .map(|f| f.with_source_id(self.system_id))
            .collect()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl TelemetrySource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn fetch(&self) -> FetchResult {
        let step = self.step.fetch_add(1, Ordering::Relaxed);
        FetchResult::from_fragments(self.fragments_at(step, now_millis()))
    }
}
