//! Read-only reference store for static city metadata.
//!
//! Backed by a small CSV file with columns
//! `city,country,population,timezone,latitude,longitude`, loaded once at
//! startup. Lookup is case-insensitive on the city name; the file's casing
//! is kept as the display form.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::model::CityMetadata;

#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    cities: HashMap<String, CityMetadata>,
}

impl ReferenceStore {
    /// Load the reference file. An unreadable file is fatal; individual
    /// malformed rows are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference file: {}", path.display()))?;

        let store = Self::parse(&contents);
        info!(
            cities = store.len(),
            path = %path.display(),
            "loaded city reference data"
        );
        Ok(store)
    }

    /// Build a store directly from metadata entries. Useful for callers that
    /// assemble reference data themselves (and for tests).
    pub fn from_cities(cities: impl IntoIterator<Item = CityMetadata>) -> Self {
        let mut store = Self::default();
        for metadata in cities {
            store.cities.insert(normalize(&metadata.city), metadata);
        }
        store
    }

    fn parse(contents: &str) -> Self {
        let mut cities = HashMap::new();

        for (i, line) in contents.lines().enumerate() {
            if i == 0 || line.trim().is_empty() {
                continue; // Skip header or empty lines
            }

            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 6 {
                warn!(line = i + 1, "skipping reference row with too few columns");
                continue;
            }

            let city = fields[0].trim();
            if city.is_empty() {
                warn!(line = i + 1, "skipping reference row with empty city name");
                continue;
            }

            let population = parse_optional_u64(fields[2]);

            let (latitude, longitude) = match (
                fields[4].trim().parse::<f64>(),
                fields[5].trim().parse::<f64>(),
            ) {
                (Ok(lat), Ok(lon)) => (lat, lon),
                _ => {
                    warn!(line = i + 1, city, "skipping reference row with bad coordinates");
                    continue;
                }
            };

            let metadata = CityMetadata {
                city: city.to_string(),
                country: fields[1].trim().to_string(),
                population,
                timezone: fields[3].trim().to_string(),
                latitude,
                longitude,
            };

            cities.insert(normalize(city), metadata);
        }

        Self { cities }
    }

    /// Case-insensitive, whitespace-trimmed lookup.
    pub fn get(&self, city: &str) -> Option<&CityMetadata> {
        self.cities.get(&normalize(city))
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

/// Normalized lookup key for a city name.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn parse_optional_u64(field: &str) -> Option<u64> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        return None;
    }
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
city,country,population,timezone,latitude,longitude
Paris,France,2102650,Europe/Paris,48.8566,2.3522
London,United Kingdom,8866180,Europe/London,51.5074,-0.1278
Pitcairn,Pitcairn Islands,unknown,Pacific/Pitcairn,-25.0667,-130.1
";

    #[test]
    fn lookup_is_case_insensitive() {
        let store = ReferenceStore::parse(SAMPLE);
        assert_eq!(store.len(), 3);

        let paris = store.get("  pArIs ").expect("Paris should be present");
        assert_eq!(paris.city, "Paris");
        assert_eq!(paris.country, "France");
        assert_eq!(paris.population, Some(2_102_650));
        assert_eq!(paris.timezone, "Europe/Paris");
    }

    #[test]
    fn unknown_population_becomes_none() {
        let store = ReferenceStore::parse(SAMPLE);
        let pitcairn = store.get("pitcairn").expect("Pitcairn should be present");
        assert_eq!(pitcairn.population, None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let contents = "\
city,country,population,timezone,latitude,longitude
Paris,France,2102650,Europe/Paris,48.8566,2.3522
Nowhere,Nowhereland
Badcoords,Xx,12,UTC,not-a-number,0.0
";
        let store = ReferenceStore::parse(contents);
        assert_eq!(store.len(), 1);
        assert!(store.get("paris").is_some());
        assert!(store.get("nowhere").is_none());
        assert!(store.get("badcoords").is_none());
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = ReferenceStore::load(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to read reference file"));
    }
}
