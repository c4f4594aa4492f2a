//! # Source Adapter Module
//!
//! Fetches raw telemetry from the external store.
//!
//! This module handles:
//! - Batch scans of the key-value store, keeping the newest record per kind
//! - Pre-aggregated snapshots from an HTTP endpoint
//! - A simulated drone for running without infrastructure
//!
//! Adapters never return errors to the poller. Transport failures (network
//! errors and non-2xx statuses) are logged and reported as
//! [`FetchResult::Failed`]. A reachable store that answers with an unusable
//! payload is logged and reported as [`FetchResult::Empty`], so the poller
//! stays connected and keeps its last snapshot.

pub mod api;
pub mod dynamo;
pub mod scan;
pub mod simulated;

#[cfg(test)]
pub(crate) mod test_server;

use async_trait::async_trait;

use crate::telemetry::{Telemetry, TelemetryFragment};

pub use api::ApiSource;
pub use dynamo::DynamoScanStore;
pub use scan::{MemoryRecordStore, RecordStore, ScanSource};
pub use simulated::SimulatedSource;

/// Result of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// Raw fragments that still need fusing
    Fragments(Vec<TelemetryFragment>),

    /// An already fused snapshot
    Snapshot(Telemetry),

    /// Reachable store, nothing to report
    Empty,

    /// Transport failure, with a message for display
    Failed(String),
}

impl FetchResult {
    /// Fragments, or `Empty` when there are none
    pub fn from_fragments(fragments: Vec<TelemetryFragment>) -> Self {
        if fragments.is_empty() {
            FetchResult::Empty
        } else {
            FetchResult::Fragments(fragments)
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchResult::Failed(_))
    }
}

/// Interchangeable source of telemetry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the current telemetry. Must not panic or block indefinitely.
    async fn fetch(&self) -> FetchResult;
}
