//! # Error Types
//!
//! Custom error types for Telemetry Fusion using `thiserror`.

use thiserror::Error;

/// Main error type for Telemetry Fusion
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Network failure reaching the external store
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the external store
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Response or record missing the expected structure
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// JSON decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command dispatch errors
    #[error("Command error: {0}")]
    Command(String),
}

impl From<reqwest::Error> for TelemetryError {
    fn from(e: reqwest::Error) -> Self {
        TelemetryError::Transport(e.to_string())
    }
}

impl TelemetryError {
    /// Whether the store answered but the payload could not be used
    pub fn is_malformed(&self) -> bool {
        matches!(self, TelemetryError::Malformed(_) | TelemetryError::Json(_))
    }
}

/// Result type alias for Telemetry Fusion
pub type Result<T> = std::result::Result<T, TelemetryError>;
