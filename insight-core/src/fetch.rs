//! Live observation fetching from the weather service.
//!
//! The `ObservationFetcher` trait is the seam the orchestrator depends on;
//! `OpenWeatherFetcher` is the production implementation against the
//! OpenWeather current-weather endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;
use crate::model::Observation;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ObservationFetcher: Send + Sync {
    /// Fetch the current observation for a city, keyed by name.
    async fn fetch(&self, city: &str) -> Result<Observation, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherFetcher {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherFetcher {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Point the fetcher at a different endpoint, e.g. a mock server in tests.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            http: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[async_trait]
impl ObservationFetcher for OpenWeatherFetcher {
    async fn fetch(&self, city: &str) -> Result<Observation, FetchError> {
        let url = format!("{}/weather", self.base_url);

        let res = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::BadResponse(format!("unreadable body: {e}")))?;

        match status {
            StatusCode::NOT_FOUND => return Err(FetchError::CityNotFound),
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            s if !s.is_success() => {
                return Err(FetchError::BadResponse(format!(
                    "status {}: {}",
                    s,
                    truncate_body(&body)
                )));
            }
            _ => {}
        }

        let parsed: OwCurrentResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::BadResponse(format!("bad JSON: {e}")))?;

        debug!(requested = city, reported = %parsed.name, "fetched current observation");

        let observed_at = unix_to_utc(parsed.dt).unwrap_or_else(Utc::now);

        let description = parsed
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Observation {
            city: city.trim().to_string(),
            temperature_c: parsed.main.temp,
            humidity_pct: parsed.main.humidity,
            wind_speed_mps: parsed.wind.speed,
            description,
            observed_at,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_parses_current_weather() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "Paris"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Paris",
                "dt": 1756548000i64,
                "main": { "temp": 11.53, "humidity": 62 },
                "weather": [ { "description": "light rain" } ],
                "wind": { "speed": 4.12 }
            })))
            .mount(&server)
            .await;

        let fetcher = OpenWeatherFetcher::with_base_url("KEY".to_string(), server.uri());
        let obs = fetcher.fetch("Paris").await.expect("fetch should succeed");

        assert_eq!(obs.city, "Paris");
        assert_eq!(obs.temperature_c, 11.53);
        assert_eq!(obs.humidity_pct, 62);
        assert_eq!(obs.description, "light rain");
        assert_eq!(obs.observed_at, unix_to_utc(1756548000).unwrap());
    }

    #[tokio::test]
    async fn not_found_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"cod": "404", "message": "city not found"})),
            )
            .mount(&server)
            .await;

        let fetcher = OpenWeatherFetcher::with_base_url("KEY".to_string(), server.uri());
        let err = fetcher.fetch("Atlantis").await.unwrap_err();
        assert!(matches!(err, FetchError::CityNotFound));
    }

    #[tokio::test]
    async fn rate_limit_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let fetcher = OpenWeatherFetcher::with_base_url("KEY".to_string(), server.uri());
        let err = fetcher.fetch("Paris").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited));
    }

    #[tokio::test]
    async fn server_error_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let fetcher = OpenWeatherFetcher::with_base_url("KEY".to_string(), server.uri());
        let err = fetcher.fetch("Paris").await.unwrap_err();
        assert!(matches!(err, FetchError::BadResponse(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let fetcher = OpenWeatherFetcher::with_base_url("KEY".to_string(), server.uri());
        let err = fetcher.fetch("Paris").await.unwrap_err();
        assert!(matches!(err, FetchError::BadResponse(_)));
    }
}
