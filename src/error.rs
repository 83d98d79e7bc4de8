// src/error.rs
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Error type for the pullmetrics library
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Collection cancelled: {0}")]
    Cancelled(String),

    #[error("Collection deadline exceeded")]
    DeadlineExceeded,

    #[error("Temporality error: {0}")]
    Temporality(String),

    #[error("No data available")]
    NoData,

    #[error("Export error: {0}")]
    Export(String),

    #[error("Other error: {0}")]
    Other(String),

    #[error(transparent)]
    Exporter(#[from] anyhow::Error),
}

impl MetricsError {
    /// Whether the error came from a cancelled or expired collection context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MetricsError::Cancelled(_) | MetricsError::DeadlineExceeded)
    }
}
