//! Batch orchestration: lookup, fetch, merge, classify, and persist for each
//! requested city, with every failure contained to the city that caused it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::classify::CategoryClassifier;
use crate::error::{InsightError, StoreError};
use crate::fetch::ObservationFetcher;
use crate::merge::merge;
use crate::model::{Category, PerCityResult, SkipReason};
use crate::reference::ReferenceStore;
use crate::store::InsightStore;

/// What to do with a record whose description could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Report the city as failed; nothing reaches the store.
    #[default]
    Drop,
    /// Persist the record with the `Unknown` sentinel category.
    StoreUnknown,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(FallbackPolicy::Drop),
            "store-unknown" => Ok(FallbackPolicy::StoreUnknown),
            other => Err(format!(
                "unknown fallback policy '{other}' (expected 'drop' or 'store-unknown')"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub fallback: FallbackPolicy,
    /// Wall-clock budget for a whole batch. When it runs out, no new per-city
    /// work is started and the results collected so far are returned.
    pub batch_timeout: Option<Duration>,
}

/// Drives the enrichment sequence for a batch of cities. All collaborators
/// are passed in at construction; there is no ambient configuration lookup.
pub struct Pipeline {
    reference: ReferenceStore,
    fetcher: Box<dyn ObservationFetcher>,
    classifier: Box<dyn CategoryClassifier>,
    store: InsightStore,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        reference: ReferenceStore,
        fetcher: Box<dyn ObservationFetcher>,
        classifier: Box<dyn CategoryClassifier>,
        store: InsightStore,
        options: PipelineOptions,
    ) -> Self {
        Self {
            reference,
            fetcher,
            classifier,
            store,
            options,
        }
    }

    pub fn store(&self) -> &InsightStore {
        &self.store
    }

    /// Process the requested cities in order, one outcome per city.
    ///
    /// The result has the same length and order as the input unless the batch
    /// timeout fires, in which case the already-completed outcomes are
    /// returned as partial results.
    pub async fn run(&self, cities: &[String]) -> Vec<PerCityResult> {
        let deadline = self.options.batch_timeout.map(|t| Instant::now() + t);
        let mut results = Vec::with_capacity(cities.len());

        for city in cities {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        completed = results.len(),
                        requested = cities.len(),
                        "batch timeout reached, returning partial results"
                    );
                    break;
                }
            }

            results.push(self.process_city(city).await);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            requested = cities.len(),
            completed = results.len(),
            succeeded,
            "batch run finished"
        );

        results
    }

    async fn process_city(&self, requested: &str) -> PerCityResult {
        let city = requested.trim().to_string();

        let failed = |error: InsightError| PerCityResult::Failed {
            city: city.clone(),
            error,
        };

        let Some(metadata) = self.reference.get(&city) else {
            return failed(InsightError::UnknownCity(city.clone()));
        };

        let observation = match self.fetcher.fetch(&city).await {
            Ok(observation) => observation,
            Err(e) => return failed(e.into()),
        };

        let merged = match merge(metadata, &observation) {
            Ok(merged) => merged,
            Err(e) => return failed(e.into()),
        };

        let category = match self.classifier.classify(&merged.description).await {
            Ok(category) => category,
            Err(e) => match self.options.fallback {
                FallbackPolicy::Drop => return failed(e.into()),
                FallbackPolicy::StoreUnknown => {
                    warn!(%city, error = %e, "classification failed, storing with Unknown category");
                    Category::Unknown
                }
            },
        };

        let record = merged.into_enriched(category, Utc::now());

        match self.store.upsert(&record).await {
            Ok(()) => PerCityResult::Success(record),
            Err(StoreError::Duplicate { .. }) => PerCityResult::Skipped {
                city: record.city,
                reason: SkipReason::AlreadyExists,
            },
            Err(e) => failed(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassificationError, FetchError};
    use crate::model::{CityMetadata, Observation};
    use async_trait::async_trait;

    struct FixedFetcher {
        temperature_c: f64,
        description: String,
    }

    #[async_trait]
    impl ObservationFetcher for FixedFetcher {
        async fn fetch(&self, city: &str) -> Result<Observation, FetchError> {
            Ok(Observation {
                city: city.to_string(),
                temperature_c: self.temperature_c,
                humidity_pct: 62,
                wind_speed_mps: 4.12,
                description: self.description.clone(),
                observed_at: Utc::now(),
            })
        }
    }

    struct TimeoutFetcher;

    #[async_trait]
    impl ObservationFetcher for TimeoutFetcher {
        async fn fetch(&self, _city: &str) -> Result<Observation, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    struct FixedClassifier(Category);

    #[async_trait]
    impl CategoryClassifier for FixedClassifier {
        async fn classify(&self, _description: &str) -> Result<Category, ClassificationError> {
            Ok(self.0)
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl CategoryClassifier for BrokenClassifier {
        async fn classify(&self, _description: &str) -> Result<Category, ClassificationError> {
            Err(ClassificationError::Unclassifiable { attempts: 2 })
        }
    }

    fn reference() -> ReferenceStore {
        ReferenceStore::from_cities([CityMetadata {
            city: "Paris".to_string(),
            country: "France".to_string(),
            population: Some(2_102_650),
            timezone: "Europe/Paris".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
        }])
    }

    async fn pipeline(
        fetcher: Box<dyn ObservationFetcher>,
        classifier: Box<dyn CategoryClassifier>,
        options: PipelineOptions,
    ) -> Pipeline {
        let store = InsightStore::in_memory().await.unwrap();
        Pipeline::new(reference(), fetcher, classifier, store, options)
    }

    fn cities(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn batch_isolates_unknown_cities() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 11.57,
                description: "light rain".to_string(),
            }),
            Box::new(FixedClassifier(Category::Rainy)),
            PipelineOptions::default(),
        )
        .await;

        let results = pipeline
            .run(&cities(&["Paris", "UnknownVille", "Paris"]))
            .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], PerCityResult::Success(_)));
        assert!(matches!(
            results[1],
            PerCityResult::Failed {
                error: InsightError::UnknownCity(_),
                ..
            }
        ));
        // Same city again: deduplicated within the same minute bucket, or a
        // second row if the run straddles a minute boundary. Never a failure.
        assert!(matches!(
            results[2],
            PerCityResult::Skipped {
                reason: SkipReason::AlreadyExists,
                ..
            } | PerCityResult::Success(_)
        ));

        assert!(pipeline.store().count().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn success_stores_rounded_canonical_record() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 11.57,
                description: "light rain".to_string(),
            }),
            Box::new(FixedClassifier(Category::Rainy)),
            PipelineOptions::default(),
        )
        .await;

        let results = pipeline.run(&cities(&["  paris "])).await;
        let PerCityResult::Success(record) = &results[0] else {
            panic!("expected success, got {:?}", results[0]);
        };

        assert_eq!(record.city, "Paris");
        assert_eq!(record.temperature_c, 11.6);
        assert_eq!(record.category, Category::Rainy);
        assert_eq!(pipeline.store().list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timing_out_fetcher_fails_every_city_and_stores_nothing() {
        let pipeline = pipeline(
            Box::new(TimeoutFetcher),
            Box::new(FixedClassifier(Category::Rainy)),
            PipelineOptions::default(),
        )
        .await;

        let results = pipeline.run(&cities(&["Paris", "Paris"])).await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(matches!(
                result,
                PerCityResult::Failed {
                    error: InsightError::Fetch(FetchError::Timeout),
                    ..
                }
            ));
        }
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drop_policy_fails_unclassifiable_records() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 11.57,
                description: "odd sky".to_string(),
            }),
            Box::new(BrokenClassifier),
            PipelineOptions {
                fallback: FallbackPolicy::Drop,
                batch_timeout: None,
            },
        )
        .await;

        let results = pipeline.run(&cities(&["Paris"])).await;
        assert!(matches!(
            results[0],
            PerCityResult::Failed {
                error: InsightError::Classify(_),
                ..
            }
        ));
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_unknown_policy_persists_the_sentinel() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 11.57,
                description: "odd sky".to_string(),
            }),
            Box::new(BrokenClassifier),
            PipelineOptions {
                fallback: FallbackPolicy::StoreUnknown,
                batch_timeout: None,
            },
        )
        .await;

        let results = pipeline.run(&cities(&["Paris"])).await;
        let PerCityResult::Success(record) = &results[0] else {
            panic!("expected success, got {:?}", results[0]);
        };
        assert_eq!(record.category, Category::Unknown);
        assert_eq!(pipeline.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn out_of_range_observation_is_a_merge_failure() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 300.0,
                description: "impossible heat".to_string(),
            }),
            Box::new(FixedClassifier(Category::Extreme)),
            PipelineOptions::default(),
        )
        .await;

        let results = pipeline.run(&cities(&["Paris"])).await;
        assert!(matches!(
            results[0],
            PerCityResult::Failed {
                error: InsightError::Merge(_),
                ..
            }
        ));
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_batch_timeout_returns_partial_results() {
        let pipeline = pipeline(
            Box::new(FixedFetcher {
                temperature_c: 11.57,
                description: "light rain".to_string(),
            }),
            Box::new(FixedClassifier(Category::Rainy)),
            PipelineOptions {
                fallback: FallbackPolicy::Drop,
                batch_timeout: Some(Duration::ZERO),
            },
        )
        .await;

        let results = pipeline.run(&cities(&["Paris", "Paris"])).await;
        assert!(results.is_empty());
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[test]
    fn fallback_policy_parses() {
        assert_eq!("drop".parse(), Ok(FallbackPolicy::Drop));
        assert_eq!("store-unknown".parse(), Ok(FallbackPolicy::StoreUnknown));
        assert!("keep".parse::<FallbackPolicy>().is_err());
    }
}
