//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files, with a small
//! set of recognized environment overrides applied on top.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};

/// Environment keys recognized by [`Config::apply_env`]
pub const ENV_SOURCE: &str = "TELEMETRY_SOURCE";
pub const ENV_REGION: &str = "TELEMETRY_REGION";
pub const ENV_TABLE_NAME: &str = "TELEMETRY_TABLE_NAME";
pub const ENV_API_ENDPOINT: &str = "TELEMETRY_API_ENDPOINT";
pub const ENV_ACCESS_KEY_ID: &str = "TELEMETRY_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "TELEMETRY_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "TELEMETRY_SESSION_TOKEN";

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which source adapter feeds the poller
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Batch scan of the key-value store, fused locally
    Scan,
    /// Pre-aggregated HTTP endpoint
    Api,
    /// Built-in simulated drone
    Simulated,
}

impl std::str::FromStr for SourceKind {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(SourceKind::Scan),
            "api" => Ok(SourceKind::Api),
            "simulated" | "mock" => Ok(SourceKind::Simulated),
            other => Err(TelemetryError::Config(toml::de::Error::custom(format!(
                "unknown source kind '{}' (expected scan, api or simulated)",
                other
            )))),
        }
    }
}

/// Source adapter configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default)]
    pub api_endpoint: String,

    /// Overrides `https://dynamodb.<region>.amazonaws.com`
    #[serde(default)]
    pub dynamodb_endpoint: String,

    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub secret_access_key: String,

    #[serde(default)]
    pub session_token: String,
}

/// Polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files. Empty logs to stdout only.
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_source_kind() -> SourceKind { SourceKind::Scan }
fn default_region() -> String { "us-east-1".to_string() }
fn default_table_name() -> String { "drone-telemetry".to_string() }
fn default_scan_limit() -> usize { 100 }
fn default_request_timeout_ms() -> u64 { 5000 }

fn default_interval_ms() -> u64 { 2000 }
fn default_stale_after_ms() -> u64 { 10000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            region: default_region(),
            table_name: default_table_name(),
            api_endpoint: String::new(),
            dynamodb_endpoint: String::new(),
            scan_limit: default_scan_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Static credentials, if both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return None;
        }
        Some((&self.access_key_id, &self.secret_access_key))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_fusion::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply recognized environment-style overrides
    ///
    /// Keys other than the `TELEMETRY_*` constants in this module are ignored.
    /// Empty values are ignored as well.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value: String = value.into();
            if value.is_empty() {
                continue;
            }

            match key.as_ref() {
                ENV_SOURCE => self.source.kind = value.parse()?,
                ENV_REGION => self.source.region = value,
                ENV_TABLE_NAME => self.source.table_name = value,
                ENV_API_ENDPOINT => self.source.api_endpoint = value,
                ENV_ACCESS_KEY_ID => self.source.access_key_id = value,
                ENV_SECRET_ACCESS_KEY => self.source.secret_access_key = value,
                ENV_SESSION_TOKEN => self.source.session_token = value,
                _ => {}
            }
        }

        self.validate()
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range or a
    /// value the selected source needs is missing
    pub fn validate(&self) -> Result<()> {
        match self.source.kind {
            SourceKind::Scan => {
                if self.source.region.is_empty() {
                    return Err(invalid("region cannot be empty for the scan source"));
                }
                if self.source.table_name.is_empty() {
                    return Err(invalid("table_name cannot be empty for the scan source"));
                }
            }
            SourceKind::Api => {
                if self.source.api_endpoint.is_empty() {
                    return Err(invalid("api_endpoint cannot be empty for the api source"));
                }
                if !self.source.api_endpoint.starts_with("http://")
                    && !self.source.api_endpoint.starts_with("https://")
                {
                    return Err(invalid("api_endpoint must be an http(s) URL"));
                }
            }
            SourceKind::Simulated => {}
        }

        if self.source.scan_limit == 0 || self.source.scan_limit > 1000 {
            return Err(invalid("scan_limit must be between 1 and 1000"));
        }

        if self.source.request_timeout_ms == 0 || self.source.request_timeout_ms > 60000 {
            return Err(invalid("request_timeout_ms must be between 1 and 60000"));
        }

        if self.source.access_key_id.is_empty() != self.source.secret_access_key.is_empty() {
            return Err(invalid(
                "access_key_id and secret_access_key must be set together",
            ));
        }

        if self.polling.interval_ms < 100 || self.polling.interval_ms > 60000 {
            return Err(invalid("interval_ms must be between 100 and 60000"));
        }

        if self.polling.stale_after_ms == 0 {
            return Err(invalid("stale_after_ms must be greater than 0"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}
