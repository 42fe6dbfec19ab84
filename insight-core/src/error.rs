//! Error taxonomy for the enrichment pipeline.
//!
//! Every failure the orchestrator needs to tell apart gets its own variant;
//! all of them are caught at the per-city boundary and folded into a
//! `PerCityResult`, so no city's failure ever reaches another city.

use thiserror::Error;

/// Failures talking to the weather service.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("city not known to the weather service")]
    CityNotFound,

    #[error("weather service rate limit exceeded")]
    RateLimited,

    #[error("request to the weather service timed out")]
    Timeout,

    #[error("network error talking to the weather service: {0}")]
    Network(String),

    #[error("unexpected weather service response: {0}")]
    BadResponse(String),
}

/// Failures combining reference metadata with an observation.
#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("metadata is for '{expected}' but observation is for '{actual}'")]
    CityMismatch { expected: String, actual: String },

    /// A source value fell outside its sanity window. Rejected rather than
    /// clamped so upstream data corruption stays visible.
    #[error("{field} value {value} outside allowed window [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Failures getting a valid category out of the language model.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// The model answered, but not with one of the six labels.
    #[error("model returned a label outside the category set: {0:?}")]
    InvalidOutput(String),

    /// Every attempt produced invalid output.
    #[error("description could not be classified after {attempts} attempt(s)")]
    Unclassifiable { attempts: u32 },

    /// The model call itself failed (network, timeout, non-success status).
    #[error("classifier backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Failures at the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The (city, time-bucket) key is already present.
    #[error("record already exists for ({city}, {time_bucket})")]
    Duplicate { city: String, time_bucket: String },

    #[error("storage error: {0}")]
    Io(#[from] sqlx::Error),
}

/// Top-level per-city error, one variant per pipeline stage.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("no reference metadata for city '{0}'")]
    UnknownCity(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Classify(#[from] ClassificationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
