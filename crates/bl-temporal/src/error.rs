//! Error types for the temporal core

use thiserror::Error;

/// Temporal error type
#[derive(Error, Debug)]
pub enum TemporalError {
    #[error("Tempo map is empty")]
    EmptyMap,

    #[error("Cannot obtain a mutable metric from an implicit map point")]
    BadTempoMetricLookup,

    #[error("State error: {0}")]
    State(String),
}

/// Result type alias
pub type TemporalResult<T> = Result<T, TemporalError>;
