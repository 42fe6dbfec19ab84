use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::classify;
use crate::pipeline::FallbackPolicy;

/// Credentials for the weather service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
}

/// Credentials and model selection for the classifier backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the backend endpoint; mostly useful for self-hosted
    /// OpenAI-compatible servers.
    pub base_url: Option<String>,
    /// Total classification attempts per description.
    pub attempts: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            attempts: classify::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Paths and policy knobs for the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// CSV file with the static city reference data.
    pub reference_path: Option<PathBuf>,
    /// SQLite database file; defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    pub fallback_policy: FallbackPolicy,
    /// Wall-clock budget for one batch run, in seconds. Absent means no limit.
    pub batch_timeout_secs: Option<u64>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [weather]
/// api_key = "..."
///
/// [classifier]
/// api_key = "..."
/// model = "gpt-4o-mini"
///
/// [pipeline]
/// reference_path = "/home/me/cities.csv"
/// fallback_policy = "drop"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub weather: WeatherConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn weather_api_key(&self) -> Result<&str> {
        self.weather.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "No weather API key configured.\n\
                 Hint: run `insight configure --weather-api-key <KEY>` first."
            )
        })
    }

    pub fn classifier_api_key(&self) -> Result<&str> {
        self.classifier.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "No classifier API key configured.\n\
                 Hint: run `insight configure --classifier-api-key <KEY>` first."
            )
        })
    }

    pub fn reference_path(&self) -> Result<&PathBuf> {
        self.pipeline.reference_path.as_ref().ok_or_else(|| {
            anyhow!(
                "No city reference file configured.\n\
                 Hint: run `insight configure --reference-path <FILE>` first."
            )
        })
    }

    /// Database path: the configured one, or a per-user default.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.pipeline.database_path {
            return Ok(path.clone());
        }

        let dirs = project_dirs()?;
        Ok(dirs.data_dir().join("insights.db"))
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.pipeline.batch_timeout_secs.map(Duration::from_secs)
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weather-insight", "insight-cli")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
