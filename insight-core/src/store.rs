//! Durable storage for enriched records.
//!
//! Single SQLite file; the `(city, time_bucket)` uniqueness constraint is the
//! deduplication mechanism, and the `ingested_at` index backs the
//! newest-first history query. Concurrent upserts to the same key are
//! serialized by the database's own conflict handling.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::{Category, EnrichedRecord};

#[derive(Debug, Clone)]
pub struct InsightStore {
    pool: Pool<Sqlite>,
}

impl InsightStore {
    /// Open (creating if missing) the database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!(path = %path.display(), "opened insight store");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store, used by tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS insights (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                city TEXT NOT NULL,
                country TEXT NOT NULL,
                population INTEGER,
                timezone TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                temperature_c REAL NOT NULL,
                humidity_pct INTEGER NOT NULL,
                wind_speed_mps REAL NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                observed_at TIMESTAMP NOT NULL,
                ingested_at TIMESTAMP NOT NULL,
                time_bucket TEXT NOT NULL,
                UNIQUE(city, time_bucket)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_insights_ingested_at ON insights (ingested_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a record, rejecting duplicates of the `(city, time_bucket)` key.
    ///
    /// A duplicate is reported as `StoreError::Duplicate` so the caller can
    /// treat it as a skip; existing history is never silently overwritten.
    pub async fn upsert(&self, record: &EnrichedRecord) -> Result<(), StoreError> {
        let result = bind_record(
            sqlx::query(
                r#"
                INSERT INTO insights (
                    city, country, population, timezone, latitude, longitude,
                    temperature_c, humidity_pct, wind_speed_mps, description,
                    category, observed_at, ingested_at, time_bucket
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(city, time_bucket) DO NOTHING
                "#,
            ),
            record,
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                city: record.city.clone(),
                time_bucket: record.time_bucket(),
            });
        }

        Ok(())
    }

    /// Insert or overwrite: same key handling as `upsert`, but an explicit
    /// refresh request replaces the existing row's measurements.
    pub async fn upsert_refresh(&self, record: &EnrichedRecord) -> Result<(), StoreError> {
        bind_record(
            sqlx::query(
                r#"
                INSERT INTO insights (
                    city, country, population, timezone, latitude, longitude,
                    temperature_c, humidity_pct, wind_speed_mps, description,
                    category, observed_at, ingested_at, time_bucket
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(city, time_bucket) DO UPDATE SET
                    temperature_c = excluded.temperature_c,
                    humidity_pct = excluded.humidity_pct,
                    wind_speed_mps = excluded.wind_speed_mps,
                    description = excluded.description,
                    category = excluded.category,
                    observed_at = excluded.observed_at,
                    ingested_at = excluded.ingested_at
                "#,
            ),
            record,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent records, newest first by `ingested_at`, at most `limit`.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<EnrichedRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT city, country, population, timezone, latitude, longitude,
                   temperature_c, humidity_pct, wind_speed_mps, description,
                   category, observed_at, ingested_at
            FROM insights
            ORDER BY ingested_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Count of stored records per category, over the whole table.
    pub async fn category_distribution(&self) -> Result<BTreeMap<Category, u64>, StoreError> {
        let rows =
            sqlx::query("SELECT category, COUNT(*) AS n FROM insights GROUP BY category")
                .fetch_all(&self.pool)
                .await?;

        let mut distribution = BTreeMap::new();
        for row in rows {
            let label: String = row.try_get("category")?;
            let count: i64 = row.try_get("n")?;
            match Category::from_str(&label) {
                Ok(category) => {
                    distribution.insert(category, count as u64);
                }
                Err(_) => warn!(label = %label, "ignoring row with unrecognized category label"),
            }
        }
        Ok(distribution)
    }

    /// Total number of stored records.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insights")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q EnrichedRecord,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&record.city)
        .bind(&record.country)
        .bind(record.population.map(|p| p as i64))
        .bind(&record.timezone)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.temperature_c)
        .bind(i64::from(record.humidity_pct))
        .bind(record.wind_speed_mps)
        .bind(&record.description)
        .bind(record.category.as_str())
        .bind(record.observed_at)
        .bind(record.ingested_at)
        .bind(record.time_bucket())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EnrichedRecord, StoreError> {
    let label: String = row.try_get("category")?;
    let category = Category::from_str(&label).unwrap_or_else(|_| {
        warn!(label = %label, "stored category label unrecognized, reading as Unknown");
        Category::Unknown
    });

    let population: Option<i64> = row.try_get("population")?;
    let humidity: i64 = row.try_get("humidity_pct")?;
    let observed_at: DateTime<Utc> = row.try_get("observed_at")?;
    let ingested_at: DateTime<Utc> = row.try_get("ingested_at")?;

    Ok(EnrichedRecord {
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        population: population.map(|p| p as u64),
        timezone: row.try_get("timezone")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        temperature_c: row.try_get("temperature_c")?,
        humidity_pct: humidity as u8,
        wind_speed_mps: row.try_get("wind_speed_mps")?,
        description: row.try_get("description")?,
        category,
        observed_at,
        ingested_at,
    })
}
