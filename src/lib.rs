//! # Telemetry Fusion Library
//!
//! Reconcile partial, independently timestamped drone telemetry fragments into
//! one coherent snapshot for a ground-station dashboard.
//!
//! This library provides the source adapters that read the telemetry store,
//! the fusion engine that merges fragments while tracking which fields were
//! observed, and the polling controller that publishes the result.

pub mod command;
pub mod config;
pub mod error;
pub mod poller;
pub mod source;
pub mod telemetry;
