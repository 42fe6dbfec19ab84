use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use insight_core::{
    Category, Config, FallbackPolicy, InsightStore, LlmClassifier, OpenWeatherFetcher,
    PerCityResult, Pipeline, PipelineOptions, ReferenceStore,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "insight", version, about = "Weather insight pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set credentials, paths, and pipeline policy. Only the given flags
    /// change; everything else keeps its stored value.
    Configure {
        /// API key for the weather service.
        #[arg(long)]
        weather_api_key: Option<String>,

        /// API key for the classifier backend.
        #[arg(long)]
        classifier_api_key: Option<String>,

        /// Classifier model name, e.g. "gpt-4o-mini".
        #[arg(long)]
        model: Option<String>,

        /// CSV file with city reference data.
        #[arg(long)]
        reference_path: Option<PathBuf>,

        /// SQLite database file for enriched records.
        #[arg(long)]
        database_path: Option<PathBuf>,

        /// What to do with unclassifiable records: "drop" or "store-unknown".
        #[arg(long)]
        fallback_policy: Option<FallbackPolicy>,
    },

    /// Run the enrichment pipeline for the given cities.
    Run {
        /// City names; comma-separated lists are also accepted.
        #[arg(required = true)]
        cities: Vec<String>,
    },

    /// Show the most recently ingested records.
    Recent {
        /// Maximum number of records to show.
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Show how many stored records fall into each category.
    Stats,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure {
                weather_api_key,
                classifier_api_key,
                model,
                reference_path,
                database_path,
                fallback_policy,
            } => {
                let mut config = Config::load()?;

                if let Some(key) = weather_api_key {
                    config.weather.api_key = Some(key);
                }
                if let Some(key) = classifier_api_key {
                    config.classifier.api_key = Some(key);
                }
                if let Some(model) = model {
                    config.classifier.model = model;
                }
                if let Some(path) = reference_path {
                    config.pipeline.reference_path = Some(path);
                }
                if let Some(path) = database_path {
                    config.pipeline.database_path = Some(path);
                }
                if let Some(policy) = fallback_policy {
                    config.pipeline.fallback_policy = policy;
                }

                config.save()?;
                println!("Saved {}", Config::config_file_path()?.display());
            }

            Command::Run { cities } => {
                let config = Config::load()?;
                let pipeline = build_pipeline(&config).await?;

                let cities = split_cities(&cities);
                let results = pipeline.run(&cities).await;

                for result in &results {
                    println!("{}", format_result(result));
                }

                let succeeded = results.iter().filter(|r| r.is_success()).count();
                println!(
                    "{}/{} cities ingested ({} requested)",
                    succeeded,
                    results.len(),
                    cities.len()
                );
            }

            Command::Recent { limit } => {
                let config = Config::load()?;
                let store = open_store(&config).await?;

                let records = store.list_recent(limit).await?;
                if records.is_empty() {
                    println!("No records yet.");
                }
                for record in records {
                    println!(
                        "{}  {:<16} {:>6.1} °C  {:>3}%  {:>5.1} m/s  {:<8} {}",
                        record.ingested_at.format("%Y-%m-%d %H:%M"),
                        record.city,
                        record.temperature_c,
                        record.humidity_pct,
                        record.wind_speed_mps,
                        record.category,
                        record.description,
                    );
                }
            }

            Command::Stats => {
                let config = Config::load()?;
                let store = open_store(&config).await?;

                let distribution = store.category_distribution().await?;
                if distribution.is_empty() {
                    println!("No records yet.");
                }
                let total: u64 = distribution.values().sum();
                for (category, count) in &distribution {
                    println!("{category:<8} {count}");
                }
                if total > 0 {
                    println!("total    {total}");
                }
            }
        }

        Ok(())
    }
}

async fn open_store(config: &Config) -> Result<InsightStore> {
    let path = config.database_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    Ok(InsightStore::open(&path).await?)
}

async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let reference = ReferenceStore::load(config.reference_path()?)?;
    let store = open_store(config).await?;

    let fetcher = OpenWeatherFetcher::new(config.weather_api_key()?.to_owned());

    let api_key = config.classifier_api_key()?.to_owned();
    let model = config.classifier.model.clone();
    let classifier = match &config.classifier.base_url {
        Some(base_url) => LlmClassifier::with_base_url(api_key, model, base_url.clone()),
        None => LlmClassifier::new(api_key, model),
    }
    .max_attempts(config.classifier.attempts);

    let options = PipelineOptions {
        fallback: config.pipeline.fallback_policy,
        batch_timeout: config.batch_timeout(),
    };

    Ok(Pipeline::new(
        reference,
        Box::new(fetcher),
        Box::new(classifier),
        store,
        options,
    ))
}

/// Accept both `run Paris London` and `run "Paris, London"`.
fn split_cities(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(|city| city.trim().to_string())
        .filter(|city| !city.is_empty())
        .collect()
}

fn format_result(result: &PerCityResult) -> String {
    match result {
        PerCityResult::Success(record) => {
            let category = if record.category == Category::Unknown {
                "Unknown (unclassified)".to_string()
            } else {
                record.category.to_string()
            };
            format!(
                "{}: {:.1} °C, humidity {}%, wind {:.1} m/s [{}]",
                record.city, record.temperature_c, record.humidity_pct, record.wind_speed_mps,
                category
            )
        }
        PerCityResult::Skipped { city, reason } => format!("{city}: skipped ({reason})"),
        PerCityResult::Failed { city, error } => format!("{city}: failed ({error})"),
    }
}
