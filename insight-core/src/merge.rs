//! Combining one reference entry with one observation into a clean record.
//!
//! Pure functions only; validation rejects out-of-window values instead of
//! clamping them, so corrupted upstream data surfaces as an error rather
//! than a plausible-looking number.

use crate::error::MergeError;
use crate::model::{CityMetadata, MergedRecord, Observation};
use crate::reference::normalize;

/// Sanity window for temperature, °C. Wider than any plausible surface
/// reading; values outside it indicate corrupted source data.
pub const TEMPERATURE_WINDOW: (f64, f64) = (-90.0, 60.0);

/// Sanity window for wind speed, m/s.
pub const WIND_SPEED_WINDOW: (f64, f64) = (0.0, 150.0);

/// Combine metadata and an observation for the same city.
///
/// Both names are compared after trimming and lowercasing; the stored name is
/// the canonical title-cased form. Temperature and wind speed are rounded to
/// one decimal.
pub fn merge(
    metadata: &CityMetadata,
    observation: &Observation,
) -> Result<MergedRecord, MergeError> {
    if normalize(&metadata.city) != normalize(&observation.city) {
        return Err(MergeError::CityMismatch {
            expected: metadata.city.clone(),
            actual: observation.city.clone(),
        });
    }

    check_window("temperature", observation.temperature_c, TEMPERATURE_WINDOW)?;
    check_window("wind speed", observation.wind_speed_mps, WIND_SPEED_WINDOW)?;
    if observation.humidity_pct > 100 {
        return Err(MergeError::OutOfRange {
            field: "humidity",
            value: f64::from(observation.humidity_pct),
            min: 0.0,
            max: 100.0,
        });
    }

    Ok(MergedRecord {
        city: canonical_city(&metadata.city),
        country: metadata.country.clone(),
        population: metadata.population,
        timezone: metadata.timezone.clone(),
        latitude: metadata.latitude,
        longitude: metadata.longitude,
        temperature_c: round1(observation.temperature_c),
        humidity_pct: observation.humidity_pct,
        wind_speed_mps: round1(observation.wind_speed_mps),
        description: observation.description.trim().to_string(),
        observed_at: observation.observed_at,
    })
}

fn check_window(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), MergeError> {
    if value.is_nan() || value < min || value > max {
        return Err(MergeError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Canonical storage casing: each whitespace-separated word capitalized.
pub fn canonical_city(name: &str) -> String {
    name.trim()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
