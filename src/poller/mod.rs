//! # Poller Module
//!
//! Drives the source adapter on a timer and publishes the dashboard state.
//!
//! This module handles:
//! - Immediate first cycle, then one cycle per interval
//! - Connectivity state derivation
//! - Last-known-good retention across empty and failed cycles
//! - In-flight guarding, stale-cycle rejection and teardown

pub mod controller;
pub mod state;

pub use controller::{CycleOutcome, FirstFetchHook, PollerHandle, PollingController, DEFAULT_POLL_INTERVAL};
pub use state::{ConnectionState, DashboardState};
