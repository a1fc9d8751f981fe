use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the candle pipeline
#[derive(Error, Debug)]
pub enum CandlebotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // Persisted data errors
    #[error("Malformed record in {path} at line {line}: {reason}")]
    Format {
        path: String,
        line: u64,
        reason: String,
    },

    // Prediction errors
    #[error("No trained model is loaded")]
    ModelNotLoaded,

    #[error("Insufficient history: {available} candles available, {required} required")]
    InsufficientHistory { available: usize, required: usize },

    #[error("Training failed: {0}")]
    Training(String),

    // Outcome resolution errors
    #[error("No candle within {tolerance_secs}s of {timestamp}")]
    CandleNotFound {
        timestamp: DateTime<Utc>,
        tolerance_secs: i64,
    },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CandlebotError {
    pub fn format(path: impl Into<String>, line: u64, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Errors the signal loop treats as "no signal this tick" rather than failures.
    pub fn is_abstention(&self) -> bool {
        matches!(
            self,
            Self::ModelNotLoaded | Self::InsufficientHistory { .. }
        )
    }
}

/// Result type alias for CandlebotError
pub type Result<T> = std::result::Result<T, CandlebotError>;
