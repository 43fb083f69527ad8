//! Error types for storm identification.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using StormError.
pub type StormResult<T> = Result<T, StormError>;

/// Primary error type for storm identification.
#[derive(Debug, Error)]
pub enum StormError {
    // === Window-level, recoverable ===
    #[error("Hourly grid missing for {timestamp}")]
    DataGap { timestamp: DateTime<Utc> },

    #[error(
        "Window starting {start} is degenerate: {exceedance} cells exceed threshold (limit {limit})"
    )]
    DegenerateWindow {
        start: DateTime<Utc>,
        exceedance: usize,
        limit: usize,
    },

    #[error("Cluster of {size} cells cannot grow to {target} cells")]
    ClusterGrowthFailure { size: usize, target: usize },

    // === Fatal ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed transposition mask: {0}")]
    MalformedMask(String),

    // === Infrastructure ===
    #[error("Grid source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid grid data: {0}")]
    InvalidGrid(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl StormError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StormError::SourceUnavailable(_) | StormError::Io(_))
    }

    /// Whether the error only invalidates the window it occurred in.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StormError::DataGap { .. }
                | StormError::DegenerateWindow { .. }
                | StormError::ClusterGrowthFailure { .. }
        )
    }
}

impl From<std::io::Error> for StormError {
    fn from(err: std::io::Error) -> Self {
        StormError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StormError {
    fn from(err: serde_json::Error) -> Self {
        StormError::Storage(format!("JSON error: {}", err))
    }
}
