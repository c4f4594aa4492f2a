//! # Telemetry Module
//!
//! Fragment model, fused snapshot and the fusion engine.
//!
//! This module handles:
//! - Parsing loosely typed store records into typed fragments
//! - Picking the newest fragment of each kind
//! - Deriving battery, altitude, flight mode and armed state
//! - Keeping the snapshot total while recording what was defaulted

pub mod fragment;
pub mod fusion;
pub mod snapshot;

pub use fragment::{FragmentPayload, RawRecord, TelemetryFragment};
pub use fusion::fuse;
pub use snapshot::{FlightMode, Telemetry};
