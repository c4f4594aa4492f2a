//! # Pre-aggregated API Source
//!
//! Calls one HTTP endpoint that already returns a fused snapshot, shaped as
//! `{ "telemetry": {...} }` or wrapped by a gateway as
//! `{ "body": "<json-encoded { telemetry }>" }`. The nested body is tried
//! first, the direct field second.
//!
//! The returned object is converted field by field so that a partial object
//! still yields a total [`Telemetry`]. When the producer does not send
//! `hasStateData`, the flag is true only if `armed` was present.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{FetchResult, TelemetrySource};
use crate::config::SourceConfig;
use crate::error::{Result, TelemetryError};
use crate::telemetry::fragment::{lenient_bool, lenient_f64, lenient_i64};
use crate::telemetry::fusion::now_millis;
use crate::telemetry::snapshot::{
    FlightMode, Telemetry, DEFAULT_BATTERY_PERCENT, UNKNOWN_FLIGHT_MODE,
};

/// Source backed by a pre-aggregated HTTP endpoint
pub struct ApiSource {
    http: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for ApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSource")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ApiSource {
    /// Build from source configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: config.api_endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_snapshot(&self) -> Result<Option<Telemetry>> {
        let response = self.http.get(&self.endpoint).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TelemetryError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Value = serde_json::from_str(&text)?;
        Ok(unwrap_envelope(envelope)?.map(|t| telemetry_from_value(&t)))
    }
}

#[async_trait]
impl TelemetrySource for ApiSource {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch(&self) -> FetchResult {
        match self.fetch_snapshot().await {
            Ok(Some(telemetry)) => {
                debug!(drone_id = %telemetry.drone_id, timestamp = telemetry.timestamp, "API snapshot received");
                FetchResult::Snapshot(telemetry)
            }
            Ok(None) => FetchResult::Empty,
            Err(e) if e.is_malformed() => {
                warn!(error = %e, endpoint = %self.endpoint, "Ignoring malformed API response");
                FetchResult::Empty
            }
            Err(e) => {
                warn!(error = %e, endpoint = %self.endpoint, "API fetch failed");
                FetchResult::Failed(e.to_string())
            }
        }
    }
}

/// Extract the telemetry object from a response envelope
///
/// A `body` (JSON-encoded string or object) carrying `telemetry` wins. When
/// it is absent, unparseable or has no `telemetry`, the direct field is used.
/// Returns `Ok(None)` when the telemetry found is `null`.
///
/// # Errors
///
/// Returns error if no telemetry field can be found.
pub fn unwrap_envelope(mut envelope: Value) -> Result<Option<Value>> {
    let body = match envelope.get_mut("body").map(Value::take) {
        Some(Value::String(body)) => serde_json::from_str::<Value>(&body).ok(),
        Some(body @ Value::Object(_)) => Some(body),
        _ => None,
    };

    for candidate in [body, Some(envelope)].into_iter().flatten() {
        if let Value::Object(mut map) = candidate {
            match map.remove("telemetry") {
                Some(Value::Null) => return Ok(None),
                Some(telemetry) => return Ok(Some(telemetry)),
                None => continue,
            }
        }
    }

    Err(TelemetryError::Malformed(
        "response has no telemetry field".to_string(),
    ))
}

fn nested_f64(value: &Value, group: &str, field: &str) -> Option<f64> {
    value.get(group).and_then(|g| g.get(field)).and_then(lenient_f64)
}

/// Convert a loosely typed telemetry object into a total snapshot
pub fn telemetry_from_value(value: &Value) -> Telemetry {
    let timestamp = value
        .get("timestamp")
        .and_then(lenient_i64)
        .unwrap_or_else(now_millis);

    let mut telemetry = Telemetry::defaults_at(timestamp);

    if let Some(id) = value.get("droneId").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        telemetry.drone_id = id.to_string();
    }

    let position = &mut telemetry.position;
    position.lat = nested_f64(value, "position", "lat").unwrap_or(position.lat);
    position.lon = nested_f64(value, "position", "lon").unwrap_or(position.lon);
    position.alt = nested_f64(value, "position", "alt").unwrap_or(position.alt);

    let velocity = &mut telemetry.velocity;
    velocity.vx = nested_f64(value, "velocity", "vx").unwrap_or(0.0);
    velocity.vy = nested_f64(value, "velocity", "vy").unwrap_or(0.0);
    velocity.vz = nested_f64(value, "velocity", "vz").unwrap_or(0.0);

    let attitude = &mut telemetry.attitude;
    attitude.roll = nested_f64(value, "attitude", "roll").unwrap_or(0.0);
    attitude.pitch = nested_f64(value, "attitude", "pitch").unwrap_or(0.0);
    attitude.yaw = nested_f64(value, "attitude", "yaw").unwrap_or(0.0);

    telemetry.battery = value
        .get("battery")
        .and_then(lenient_f64)
        .map(|b| b.clamp(0.0, 100.0))
        .unwrap_or(DEFAULT_BATTERY_PERCENT);

    telemetry.flight_mode = match value.get("flightMode") {
        Some(Value::String(mode)) if !mode.is_empty() => mode.clone(),
        Some(code @ Value::Number(_)) => lenient_i64(code)
            .map(|c| FlightMode::from_code(c).to_string())
            .unwrap_or_else(|| UNKNOWN_FLIGHT_MODE.to_string()),
        _ => UNKNOWN_FLIGHT_MODE.to_string(),
    };

    let armed = value.get("armed").and_then(lenient_bool);
    telemetry.armed = armed.unwrap_or(false);
    telemetry.has_state_data = value
        .get("hasStateData")
        .and_then(lenient_bool)
        .unwrap_or(armed.is_some());

    telemetry
}
