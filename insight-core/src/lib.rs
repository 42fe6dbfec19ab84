//! Core library for the weather insight pipeline.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The static city reference store and the live observation fetcher
//! - Merging, cleaning, and model-based classification of observations
//! - The SQLite-backed insight store and the batch orchestrator
//!
//! It is used by `insight-cli`, but can also be reused by other binaries or
//! services that want to drive the pipeline or query its history.

pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod reference;
pub mod store;

pub use classify::{CategoryClassifier, LlmClassifier};
pub use config::Config;
pub use error::{ClassificationError, FetchError, InsightError, MergeError, StoreError};
pub use fetch::{ObservationFetcher, OpenWeatherFetcher};
pub use model::{Category, CityMetadata, EnrichedRecord, Observation, PerCityResult, SkipReason};
pub use pipeline::{FallbackPolicy, Pipeline, PipelineOptions};
pub use reference::ReferenceStore;
pub use store::InsightStore;
