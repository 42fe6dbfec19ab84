use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Static reference metadata for one city, loaded once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct CityMetadata {
    pub city: String,
    pub country: String,
    /// `None` when the reference file does not know the population.
    pub population: Option<u64>,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One live weather reading for a city. Consumed by the merger, never
/// persisted on its own.
#[derive(Debug, Clone)]
pub struct Observation {
    pub city: String,
    pub temperature_c: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub description: String,
    pub observed_at: DateTime<Utc>,
}

/// Fixed weather classification labels.
///
/// `Unknown` is a sentinel applied by the pipeline when classification fails
/// and the fallback policy says to keep the record anyway; the classifier
/// itself only ever produces one of the six real labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Clear,
    Cloudy,
    Rainy,
    Stormy,
    Snowy,
    Extreme,
    Unknown,
}

impl Category {
    /// The six labels the classifier is allowed to return.
    pub const CLASSIFIABLE: &'static [Category] = &[
        Category::Clear,
        Category::Cloudy,
        Category::Rainy,
        Category::Stormy,
        Category::Snowy,
        Category::Extreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Clear => "Clear",
            Category::Cloudy => "Cloudy",
            Category::Rainy => "Rainy",
            Category::Stormy => "Stormy",
            Category::Snowy => "Snowy",
            Category::Extreme => "Extreme",
            Category::Unknown => "Unknown",
        }
    }

    /// Parse a model-produced label against the six classifiable categories.
    ///
    /// Case-insensitive; tolerates surrounding whitespace, quotes, and
    /// trailing punctuation ("rainy.", "\"Stormy\""). Never yields `Unknown`.
    pub fn from_label(label: &str) -> Option<Category> {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .trim();

        Category::CLASSIFIABLE
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(cleaned))
            .copied()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Strict parse over all seven labels, used when reading stored rows.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Clear" => Ok(Category::Clear),
            "Cloudy" => Ok(Category::Cloudy),
            "Rainy" => Ok(Category::Rainy),
            "Stormy" => Ok(Category::Stormy),
            "Snowy" => Ok(Category::Snowy),
            "Extreme" => Ok(Category::Extreme),
            "Unknown" => Ok(Category::Unknown),
            other => Err(format!("not a category label: {other}")),
        }
    }
}

/// Output of the merger: reference metadata and an observation combined and
/// cleaned, still waiting for a category.
#[derive(Debug, Clone)]
pub struct MergedRecord {
    pub city: String,
    pub country: String,
    pub population: Option<u64>,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_c: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub description: String,
    pub observed_at: DateTime<Utc>,
}

impl MergedRecord {
    /// Attach the classification outcome and the ingestion timestamp.
    pub fn into_enriched(self, category: Category, ingested_at: DateTime<Utc>) -> EnrichedRecord {
        EnrichedRecord {
            city: self.city,
            country: self.country,
            population: self.population,
            timezone: self.timezone,
            latitude: self.latitude,
            longitude: self.longitude,
            temperature_c: self.temperature_c,
            humidity_pct: self.humidity_pct,
            wind_speed_mps: self.wind_speed_mps,
            description: self.description,
            category,
            observed_at: self.observed_at,
            ingested_at,
        }
    }
}

/// Fully enriched record as persisted by the insight store. Append-only once
/// written; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub city: String,
    pub country: String,
    pub population: Option<u64>,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_c: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub description: String,
    pub category: Category,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Deduplication bucket: `ingested_at` truncated to the minute. Together
    /// with the city name this forms the store's uniqueness key.
    pub fn time_bucket(&self) -> String {
        self.ingested_at.format("%Y-%m-%dT%H:%M").to_string()
    }
}

/// Why a city was skipped rather than written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A record for this (city, time-bucket) already exists.
    AlreadyExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists => f.write_str("already ingested for this time bucket"),
        }
    }
}

/// Outcome of processing one requested city within a batch run. A batch
/// always yields exactly one of these per input city, in input order.
#[derive(Debug)]
pub enum PerCityResult {
    Success(EnrichedRecord),
    Skipped { city: String, reason: SkipReason },
    Failed { city: String, error: crate::error::InsightError },
}

impl PerCityResult {
    pub fn city(&self) -> &str {
        match self {
            PerCityResult::Success(record) => &record.city,
            PerCityResult::Skipped { city, .. } => city,
            PerCityResult::Failed { city, .. } => city,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PerCityResult::Success(_))
    }
}
