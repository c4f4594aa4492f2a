//! # Batch Scan Source
//!
//! Reads up to N raw records from a key-value store with no server-side
//! filter, then keeps the newest record of each kind.
//!
//! Selection sorts by effective timestamp (newest first) and makes one pass,
//! keeping the first record seen per kind. The pass stops as soon as every
//! kind in [`KNOWN_KINDS`] has been seen. A kind introduced later that sorts
//! after that point is not returned.

use std::collections::HashSet;
use std::cmp::Reverse;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{FetchResult, TelemetrySource};
use crate::error::Result;
use crate::telemetry::fragment::{RawRecord, KNOWN_KINDS};

/// Default number of records requested per scan
pub const DEFAULT_SCAN_LIMIT: usize = 100;

/// Scan-style read access to the raw record store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Return up to `limit` raw records, in any order
    async fn scan(&self, limit: usize) -> Result<Vec<RawRecord>>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn scan(&self, limit: usize) -> Result<Vec<RawRecord>> {
        (**self).scan(limit).await
    }
}

/// Keep the newest record per kind
///
/// Records with equal timestamps keep their store order.
pub fn select_latest(mut records: Vec<RawRecord>) -> Vec<RawRecord> {
    records.sort_by_cached_key(|r| Reverse(r.effective_timestamp()));

    let mut seen: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();

    for record in records {
        if seen.insert(record.kind().to_string()) {
            selected.push(record);
        }

        if KNOWN_KINDS.iter().all(|kind| seen.contains(*kind)) {
            break;
        }
    }

    selected
}

/// Source that scans a [`RecordStore`] and returns fragments for fusion
pub struct ScanSource<S: RecordStore> {
    store: S,
    limit: usize,
}

impl<S: RecordStore> ScanSource<S> {
    pub fn new(store: S) -> Self {
        Self::with_limit(store, DEFAULT_SCAN_LIMIT)
    }

    pub fn with_limit(store: S, limit: usize) -> Self {
        Self { store, limit }
    }
}

#[async_trait]
impl<S: RecordStore> TelemetrySource for ScanSource<S> {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn fetch(&self) -> FetchResult {
        let records = match self.store.scan(self.limit).await {
            Ok(records) => records,
            Err(e) if e.is_malformed() => {
                warn!(error = %e, "Ignoring malformed scan response");
                return FetchResult::Empty;
            }
            Err(e) => {
                warn!(error = %e, "Record scan failed");
                return FetchResult::Failed(e.to_string());
            }
        };

        let scanned = records.len();
        let fragments: Vec<_> = select_latest(records)
            .iter()
            .map(RawRecord::to_fragment)
            .collect();

        debug!(scanned, selected = fragments.len(), "Record scan complete");
        FetchResult::from_fragments(fragments)
    }
}

/// In-memory record store
///
/// Returns the most recently pushed records first. Used for replaying captured
/// records and in tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<RawRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Load a JSON array of raw records
    pub fn from_json(json: &str) -> Result<Self> {
        let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
        Ok(Self::from_records(
            values.into_iter().map(RawRecord::from_value).collect(),
        ))
    }

    pub fn push(&self, record: RawRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn scan(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| crate::error::TelemetryError::Transport("record store poisoned".to_string()))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::telemetry::fragment::FragmentPayload;
    use serde_json::json;

    fn record(kind: &str, ts: i64, extra: serde_json::Value) -> RawRecord {
        let mut data = json!({ "type": kind, "timestamp": ts });
        if let (Some(map), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        RawRecord::from_value(json!({ "timestamp": ts, "data": data }))
    }

    #[test]
    fn test_select_latest_keeps_newest_per_kind() {
        let records = vec![
            record("battery", 100, json!({ "remaining": 80 })),
            record("battery", 200, json!({ "remaining": 30 })),
            record("state", 150, json!({ "armed": true })),
        ];

        let selected = select_latest(records);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].kind(), "battery");
        assert_eq!(selected[0].effective_timestamp(), 200);
        assert_eq!(selected[1].kind(), "state");
    }

    #[test]
    fn test_select_latest_stops_after_known_kinds() {
        let records = vec![
            record("battery", 300, json!({})),
            record("altitude", 290, json!({})),
            record("state", 280, json!({})),
            record("heartbeat", 100, json!({})),
        ];

        let kinds: Vec<String> = select_latest(records)
            .iter()
            .map(|r| r.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["battery", "altitude", "state"]);
    }

    #[test]
    fn test_select_latest_keeps_unknown_kinds_seen_before_exit() {
        let records = vec![
            record("heartbeat", 400, json!({})),
            record("battery", 300, json!({})),
        ];
        assert_eq!(select_latest(records).len(), 2);
    }

    #[test]
    fn test_select_latest_empty() {
        assert!(select_latest(vec![]).is_empty());
    }

    #[tokio::test]
    async fn test_scan_source_returns_fragments() {
        let store = MemoryRecordStore::from_records(vec![
            record("battery", 100, json!({ "remaining": 60 })),
            record("state", 110, json!({ "armed": true, "mode": 5 })),
        ]);
        let source = ScanSource::new(store);

        match source.fetch().await {
            FetchResult::Fragments(fragments) => {
                assert_eq!(fragments.len(), 2);
                assert_eq!(fragments[0].kind(), "state");
                assert!(matches!(fragments[1].payload, FragmentPayload::Battery(_)));
            }
            other => panic!("Expected fragments, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_source_empty_store() {
        let source = ScanSource::new(MemoryRecordStore::new());
        assert_eq!(source.fetch().await, FetchResult::Empty);
    }

    #[tokio::test]
    async fn test_scan_source_converts_errors() {
        let mut store = MockRecordStore::new();
        store
            .expect_scan()
            .withf(|limit| *limit == 25)
            .returning(|_| Err(TelemetryError::Transport("connection refused".to_string())));

        let source = ScanSource::with_limit(store, 25);
        match source.fetch().await {
            FetchResult::Failed(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected failure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_source_malformed_response_is_empty() {
        let mut store = MockRecordStore::new();
        store
            .expect_scan()
            .returning(|_| Err(TelemetryError::Malformed("missing Items".to_string())));

        let source = ScanSource::new(store);
        assert_eq!(source.fetch().await, FetchResult::Empty);
    }

    #[tokio::test]
    async fn test_memory_store_limit_prefers_recent_pushes() {
        let store = MemoryRecordStore::new();
        for ts in 0..5 {
            store.push(record("battery", ts, json!({})));
        }
        assert_eq!(store.len(), 5);

        let scanned = store.scan(2).await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].effective_timestamp(), 4);
        assert_eq!(scanned[1].effective_timestamp(), 3);
    }

    #[test]
    fn test_memory_store_from_json() {
        let store = MemoryRecordStore::from_json(
            r#"[{"timestamp": 1, "data": {"type": "battery"}}, "garbage"]"#,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        assert!(MemoryRecordStore::from_json("{}").is_err());
    }
}
