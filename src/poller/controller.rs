//! # Polling Controller
//!
//! Owns the fetch-fuse-publish lifecycle.
//!
//! ## State machine
//!
//! ```text
//! Idle -> Polling -> Connected <-> Disconnected
//! ```
//!
//! - `start` runs one cycle immediately, then one per interval.
//! - Fragments or a snapshot replace the published telemetry: `Connected`.
//! - An empty fetch keeps the previous telemetry: `Connected`.
//! - A failed fetch keeps the previous telemetry and records the error:
//!   `Disconnected`.
//!
//! At most one cycle is in flight. A tick that fires while a fetch is still
//! running is skipped. Every cycle carries a sequence number and results from
//! a cycle older than the last applied one are dropped. After teardown no
//! cycle publishes anything.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::state::{ConnectionState, DashboardState};
use crate::source::{FetchResult, TelemetrySource};
use crate::telemetry::fusion::{fuse, now_millis};

/// Default polling period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Called once with the result of the first completed fetch
pub type FirstFetchHook = Box<dyn FnOnce(&FetchResult) + Send>;

/// What a single cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New telemetry was published
    Published,
    /// Store reachable but empty, previous telemetry kept
    Retained,
    /// Fetch failed, previous telemetry kept
    Disconnected,
    /// Another cycle was still in flight
    SkippedInFlight,
    /// A newer cycle had already been applied
    Superseded,
    /// The controller was torn down
    TornDown,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic fetch-fuse-publish loop around one [`TelemetrySource`]
pub struct PollingController {
    source: Arc<dyn TelemetrySource>,
    interval: Duration,
    state_tx: watch::Sender<DashboardState>,
    in_flight: AtomicBool,
    next_cycle: AtomicU64,
    torn_down: AtomicBool,
    first_fetch_hook: Mutex<Option<FirstFetchHook>>,
}

impl std::fmt::Debug for PollingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingController")
            .field("source", &self.source.name())
            .field("interval", &self.interval)
            .field("torn_down", &self.torn_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Default first-fetch diagnostic: log what the store returned
fn log_first_fetch(result: &FetchResult) {
    match result {
        FetchResult::Fragments(fragments) => {
            let kinds: Vec<&str> = fragments.iter().map(|f| f.kind()).collect();
            info!(?kinds, "First fetch returned fragments");
        }
        FetchResult::Snapshot(telemetry) => {
            info!(drone_id = %telemetry.drone_id, "First fetch returned a snapshot");
        }
        FetchResult::Empty => info!("First fetch returned no data"),
        FetchResult::Failed(error) => warn!(%error, "First fetch failed"),
    }
}

impl PollingController {
    /// Create a controller polling `source` every `interval`
    pub fn new(source: Arc<dyn TelemetrySource>, interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(DashboardState::default());
        Self {
            source,
            interval,
            state_tx,
            in_flight: AtomicBool::new(false),
            next_cycle: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
            first_fetch_hook: Mutex::new(Some(Box::new(log_first_fetch))),
        }
    }

    /// Replace the first-fetch diagnostic hook
    pub fn with_first_fetch_hook(self, hook: FirstFetchHook) -> Self {
        if let Ok(mut slot) = self.first_fetch_hook.lock() {
            *slot = Some(hook);
        }
        self
    }

    /// Current published state
    pub fn state(&self) -> DashboardState {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state_tx.subscribe()
    }

    /// Whether the command surface should be enabled
    pub fn commands_enabled(&self) -> bool {
        !self.is_torn_down() && self.state_tx.borrow().is_connected()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stop publishing. Cycles still in flight complete without effect.
    pub fn tear_down(&self) {
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            info!(source = self.source.name(), "Polling controller torn down");
        }
    }

    /// Run one fetch-fuse-publish cycle
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.is_torn_down() {
            return CycleOutcome::TornDown;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(source = self.source.name(), "Previous cycle still in flight, skipping");
            return CycleOutcome::SkippedInFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let cycle = self.next_cycle.fetch_add(1, Ordering::AcqRel) + 1;
        self.state_tx.send_if_modified(|state| {
            if state.connection == ConnectionState::Idle {
                state.connection = ConnectionState::Polling;
                true
            } else {
                false
            }
        });

        let result = self.source.fetch().await;
        self.fire_first_fetch_hook(&result);
        self.apply(cycle, result)
    }

    fn fire_first_fetch_hook(&self, result: &FetchResult) {
        let hook = match self.first_fetch_hook.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(hook) = hook {
            hook(result);
        }
    }

    /// Apply the result of cycle `cycle` to the published state
    fn apply(&self, cycle: u64, result: FetchResult) -> CycleOutcome {
        if self.is_torn_down() {
            debug!(cycle, "Dropping result after teardown");
            return CycleOutcome::TornDown;
        }

        let source = self.source.name();
        let mut outcome = CycleOutcome::Superseded;

        self.state_tx.send_if_modified(|state| {
            if cycle <= state.cycle {
                return false;
            }
            state.cycle = cycle;

            let published = match result {
                FetchResult::Fragments(fragments) if !fragments.is_empty() => {
                    let telemetry = fuse(&fragments);
                    debug!(source, cycle, fragments = fragments.len(), timestamp = telemetry.timestamp, "Published fused telemetry");
                    Some(telemetry)
                }
                FetchResult::Snapshot(telemetry) => {
                    debug!(source, cycle, timestamp = telemetry.timestamp, "Published snapshot");
                    Some(telemetry)
                }
                FetchResult::Fragments(_) | FetchResult::Empty => {
                    debug!(source, cycle, "No data yet, keeping last snapshot");
                    None
                }
                FetchResult::Failed(error) => {
                    if state.connection != ConnectionState::Disconnected {
                        warn!(source, cycle, %error, "Connection lost");
                    }
                    state.connection = ConnectionState::Disconnected;
                    state.last_error = Some(error);
                    outcome = CycleOutcome::Disconnected;
                    return true;
                }
            };

            outcome = match published {
                Some(telemetry) => {
                    state.telemetry = Some(telemetry);
                    state.updated_at = Some(now_millis());
                    CycleOutcome::Published
                }
                None => CycleOutcome::Retained,
            };

            if state.connection == ConnectionState::Disconnected {
                info!(source, cycle, "Connection restored");
            }
            state.connection = ConnectionState::Connected;
            state.last_error = None;
            true
        });

        if outcome == CycleOutcome::Superseded {
            debug!(cycle, "Dropping result of superseded cycle");
        }
        outcome
    }

    /// Spawn the polling loop
    ///
    /// The first cycle runs immediately. Each later tick spawns a cycle
    /// without waiting for the previous one, relying on the in-flight guard.
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let controller = Arc::clone(&self);
        let task = tokio::spawn(async move { controller.run().await });
        PollerHandle {
            controller: self,
            task: Some(task),
        }
    }

    async fn run(self: Arc<Self>) {
        info!(
            source = self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Polling controller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.is_torn_down() {
                break;
            }

            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                controller.run_cycle().await;
            });
        }

        debug!("Polling loop stopped");
    }
}

/// Handle to a running [`PollingController`]
///
/// Dropping the handle tears the controller down.
#[derive(Debug)]
pub struct PollerHandle {
    controller: Arc<PollingController>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.controller.subscribe()
    }

    pub fn commands_enabled(&self) -> bool {
        self.controller.commands_enabled()
    }

    /// Cancel the timer and suppress any in-flight cycle
    pub fn shutdown(&mut self) {
        self.controller.tear_down();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::source::{test_server, ApiSource, MockTelemetrySource};
    use crate::telemetry::fragment::{
        AltitudeReading, BatteryReading, FragmentPayload, StateReading, TelemetryFragment,
    };
    use crate::telemetry::Telemetry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn scenario_fragments() -> Vec<TelemetryFragment> {
        vec![
            TelemetryFragment::new(
                100,
                FragmentPayload::Battery(BatteryReading { remaining: Some(60.0), voltage: None }),
            ),
            TelemetryFragment::new(
                105,
                FragmentPayload::Altitude(AltitudeReading { relative: Some(12.5), amsl: None }),
            ),
            TelemetryFragment::new(
                110,
                FragmentPayload::State(StateReading { armed: Some(true), mode: Some(5) }),
            ),
        ]
    }

    /// Source that replays a fixed script of results
    struct ScriptedSource {
        script: Mutex<VecDeque<FetchResult>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<FetchResult>) -> Self {
            Self { script: Mutex::new(script.into()) }
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self) -> FetchResult {
            self.script.lock().unwrap().pop_front().unwrap_or(FetchResult::Empty)
        }
    }

    /// Source whose fetch blocks until released
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    impl GatedSource {
        fn new() -> Self {
            Self { entered: Notify::new(), release: Notify::new() }
        }
    }

    #[async_trait]
    impl TelemetrySource for GatedSource {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn fetch(&self) -> FetchResult {
            self.entered.notify_one();
            self.release.notified().await;
            FetchResult::Fragments(scenario_fragments())
        }
    }

    fn controller_for(source: impl TelemetrySource + 'static) -> PollingController {
        PollingController::new(Arc::new(source), DEFAULT_POLL_INTERVAL)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let controller = controller_for(ScriptedSource::new(vec![]));
        let state = controller.state();
        assert_eq!(state.connection, ConnectionState::Idle);
        assert!(state.telemetry.is_none());
        assert!(!controller.commands_enabled());
    }

    #[tokio::test]
    async fn test_fragments_are_fused_and_published() {
        let controller = controller_for(ScriptedSource::new(vec![FetchResult::Fragments(scenario_fragments())]));

        assert_eq!(controller.run_cycle().await, CycleOutcome::Published);

        let state = controller.state();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.cycle, 1);
        assert!(state.updated_at.is_some());
        let telemetry = state.telemetry.unwrap();
        assert_eq!(telemetry.battery, 60.0);
        assert_eq!(telemetry.position.alt, 12.5);
        assert!(telemetry.armed);
        assert!(telemetry.has_state_data);
        assert_eq!(telemetry.flight_mode, "LOITER");
        assert_eq!(telemetry.timestamp, 110);
        assert!(controller.commands_enabled());
    }

    #[tokio::test]
    async fn test_empty_poll_keeps_snapshot_and_stays_connected() {
        let controller = controller_for(ScriptedSource::new(vec![
            FetchResult::Fragments(scenario_fragments()),
            FetchResult::Empty,
            FetchResult::Fragments(vec![]),
        ]));

        controller.run_cycle().await;
        let before = controller.state().telemetry;

        assert_eq!(controller.run_cycle().await, CycleOutcome::Retained);
        assert_eq!(controller.run_cycle().await, CycleOutcome::Retained);

        let state = controller.state();
        assert_eq!(state.telemetry, before);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.cycle, 3);
    }

    #[tokio::test]
    async fn test_empty_first_poll_is_connected_without_data() {
        let controller = controller_for(ScriptedSource::new(vec![FetchResult::Empty]));
        assert_eq!(controller.run_cycle().await, CycleOutcome::Retained);

        let state = controller.state();
        assert!(state.telemetry.is_none());
        assert!(state.is_connected());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_error_isolation_and_recovery() {
        let mut replacement = scenario_fragments();
        replacement[0] = TelemetryFragment::new(
            200,
            FragmentPayload::Battery(BatteryReading { remaining: Some(45.0), voltage: None }),
        );

        let controller = controller_for(ScriptedSource::new(vec![
            FetchResult::Fragments(scenario_fragments()),
            FetchResult::Failed("HTTP 500: internal".to_string()),
            FetchResult::Fragments(replacement),
        ]));

        controller.run_cycle().await;
        let before = controller.state().telemetry;

        assert_eq!(controller.run_cycle().await, CycleOutcome::Disconnected);
        let state = controller.state();
        assert_eq!(state.telemetry, before);
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(state.last_error.as_deref(), Some("HTTP 500: internal"));
        assert!(!controller.commands_enabled());

        assert_eq!(controller.run_cycle().await, CycleOutcome::Published);
        let state = controller.state();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert!(state.last_error.is_none());
        let telemetry = state.telemetry.unwrap();
        assert_eq!(telemetry.battery, 45.0);
        assert_eq!(telemetry.timestamp, 200);
    }

    #[tokio::test]
    async fn test_malformed_api_response_stays_connected() {
        let good = serde_json::json!({ "telemetry": { "droneId": "d9", "battery": 33, "armed": true } });
        let (url, _requests) = test_server::serve(vec![
            (200, good.to_string()),
            (200, r#"{"status":"ok"}"#.to_string()),
            (200, "not json".to_string()),
        ])
        .await;

        let config = SourceConfig {
            api_endpoint: url,
            request_timeout_ms: 2000,
            ..SourceConfig::default()
        };
        let source = ApiSource::from_config(&config).unwrap();
        let controller = controller_for(source);

        assert_eq!(controller.run_cycle().await, CycleOutcome::Published);
        let before = controller.state().telemetry;
        assert_eq!(before.as_ref().map(|t| t.drone_id.as_str()), Some("d9"));

        for _ in 0..2 {
            assert_eq!(controller.run_cycle().await, CycleOutcome::Retained);
            let state = controller.state();
            assert_eq!(state.connection, ConnectionState::Connected);
            assert!(state.last_error.is_none());
            assert_eq!(state.telemetry, before);
            assert!(controller.commands_enabled());
        }
    }

    #[tokio::test]
    async fn test_snapshot_published_directly() {
        let mut snapshot = Telemetry::defaults_at(77);
        snapshot.drone_id = "drone-api".to_string();

        let mut source = MockTelemetrySource::new();
        source.expect_name().return_const("mock");
        let expected = snapshot.clone();
        source
            .expect_fetch()
            .times(1)
            .returning(move || FetchResult::Snapshot(snapshot.clone()));

        let controller = PollingController::new(Arc::new(source), DEFAULT_POLL_INTERVAL);
        assert_eq!(controller.run_cycle().await, CycleOutcome::Published);
        assert_eq!(controller.state().telemetry, Some(expected));
    }

    #[tokio::test]
    async fn test_in_flight_guard_skips_overlapping_cycle() {
        let source = Arc::new(GatedSource::new());
        let controller = Arc::new(PollingController::new(source.clone(), DEFAULT_POLL_INTERVAL));

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run_cycle().await })
        };
        source.entered.notified().await;
        assert_eq!(controller.state().connection, ConnectionState::Polling);

        assert_eq!(controller.run_cycle().await, CycleOutcome::SkippedInFlight);

        source.release.notify_one();
        assert_eq!(first.await.unwrap(), CycleOutcome::Published);
        assert_eq!(controller.state().cycle, 1);
    }

    #[tokio::test]
    async fn test_teardown_suppresses_in_flight_cycle() {
        let source = Arc::new(GatedSource::new());
        let controller = Arc::new(PollingController::new(source.clone(), DEFAULT_POLL_INTERVAL));

        let cycle = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run_cycle().await })
        };
        source.entered.notified().await;

        controller.tear_down();
        source.release.notify_one();

        assert_eq!(cycle.await.unwrap(), CycleOutcome::TornDown);
        assert!(controller.state().telemetry.is_none());
        assert_eq!(controller.run_cycle().await, CycleOutcome::TornDown);
    }

    #[tokio::test]
    async fn test_stale_cycle_is_discarded() {
        let controller = controller_for(ScriptedSource::new(vec![]));

        assert_eq!(controller.apply(2, FetchResult::Fragments(scenario_fragments())), CycleOutcome::Published);
        assert_eq!(controller.apply(1, FetchResult::Failed("late".to_string())), CycleOutcome::Superseded);

        let state = controller.state();
        assert_eq!(state.cycle, 2);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_first_fetch_hook_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let controller = controller_for(ScriptedSource::new(vec![
            FetchResult::Failed("down".to_string()),
            FetchResult::Empty,
        ]))
        .with_first_fetch_hook(Box::new(move |result| {
            assert!(result.is_failure());
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        controller.run_cycle().await;
        controller.run_cycle().await;
        controller.run_cycle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_immediately_then_on_interval() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);

        let mut source = MockTelemetrySource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            FetchResult::Empty
        });

        let started = tokio::time::Instant::now();
        let controller = Arc::new(PollingController::new(Arc::new(source), DEFAULT_POLL_INTERVAL));
        let mut handle = controller.start();
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.cycle >= 1).await.unwrap();
        assert!(started.elapsed() < DEFAULT_POLL_INTERVAL);

        rx.wait_for(|s| s.cycle >= 2).await.unwrap();
        assert!(started.elapsed() >= DEFAULT_POLL_INTERVAL);
        assert!(handle.commands_enabled());

        handle.shutdown();
        let seen = fetches.load(Ordering::SeqCst);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(fetches.load(Ordering::SeqCst), seen);
        assert!(!handle.commands_enabled());
    }

    #[tokio::test]
    async fn test_dropping_handle_tears_down() {
        let controller = Arc::new(controller_for(ScriptedSource::new(vec![])));
        let handle = Arc::clone(&controller).start();
        drop(handle);
        assert!(controller.is_torn_down());
    }
}
