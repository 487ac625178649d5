use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;

use crate::{
    config::Tariffs,
    model::{PriceRecord, Region},
};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored price row is unreadable: {0}")]
    Corrupt(String),
}

/// Persistence boundary for price records.
///
/// `save_all` must be safe to call concurrently with overlapping batches: a record whose
/// (region, price_date_time) is already stored is skipped and left out of the result.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn exists(
        &self,
        region: Region,
        price_date_time: NaiveDateTime,
    ) -> Result<bool, PersistenceError>;

    async fn save_all(&self, records: &[PriceRecord]) -> Result<Vec<PriceRecord>, PersistenceError>;

    async fn find_by_region_and_date(
        &self,
        region: Region,
        date: NaiveDate,
    ) -> Result<Vec<PriceRecord>, PersistenceError>;

    async fn delete_by_region_and_date(
        &self,
        region: Region,
        date: NaiveDate,
    ) -> Result<u64, PersistenceError>;

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<u64, PersistenceError>;
}

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_db(db_path: &str) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Self::migrate(pool).await
    }

    /// Private database living as long as the pool's single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS electricity_prices (
                id                  INTEGER PRIMARY KEY,
                region              TEXT NOT NULL,
                price_date          TEXT NOT NULL,
                hour                INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
                price_date_time     TEXT NOT NULL,
                spot_price          TEXT NOT NULL,
                transmission_tariff TEXT NOT NULL,
                system_tariff       TEXT NOT NULL,
                electricity_tax     TEXT NOT NULL,
                total_price         TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                UNIQUE(region, price_date_time)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_date_region
                ON electricity_prices (region, price_date, hour)",
        )
        .execute(&pool)
        .await?;

        Ok(Self::new(pool))
    }

    pub async fn count(&self) -> Result<i64, PersistenceError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM electricity_prices")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl PriceStore for Db {
    async fn exists(
        &self,
        region: Region,
        price_date_time: NaiveDateTime,
    ) -> Result<bool, PersistenceError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM electricity_prices WHERE region = ? AND price_date_time = ?",
        )
        .bind(region.as_str())
        .bind(price_date_time)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn save_all(&self, records: &[PriceRecord]) -> Result<Vec<PriceRecord>, PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut saved = Vec::with_capacity(records.len());
        let mut tx = self.pool.begin().await?;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO electricity_prices
                    (region, price_date, hour, price_date_time, spot_price, transmission_tariff,
                     system_tariff, electricity_tax, total_price, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(region, price_date_time) DO NOTHING",
            )
            .bind(record.region().as_str())
            .bind(record.price_date())
            .bind(record.hour() as i64)
            .bind(record.price_date_time())
            .bind(record.spot_price().to_string())
            .bind(record.transmission_tariff().to_string())
            .bind(record.system_tariff().to_string())
            .bind(record.electricity_tax().to_string())
            .bind(record.total_price().to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                saved.push(record.clone());
            }
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn find_by_region_and_date(
        &self,
        region: Region,
        date: NaiveDate,
    ) -> Result<Vec<PriceRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, PriceRow>(
            "SELECT region, price_date, hour, spot_price, transmission_tariff, system_tariff,
                    electricity_tax
             FROM electricity_prices
             WHERE region = ? AND price_date = ?
             ORDER BY price_date_time",
        )
        .bind(region.as_str())
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PriceRow::into_record).collect()
    }

    async fn delete_by_region_and_date(
        &self,
        region: Region,
        date: NaiveDate,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM electricity_prices WHERE region = ? AND price_date = ?")
            .bind(region.as_str())
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM electricity_prices WHERE price_date_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// --- Types ---

#[derive(Debug, Clone, sqlx::FromRow)]
struct PriceRow {
    region: String,
    price_date: NaiveDate,
    hour: i64,
    spot_price: String,
    transmission_tariff: String,
    system_tariff: String,
    electricity_tax: String,
}

impl PriceRow {
    /// The stored total is ignored; the record recomputes it from the components.
    fn into_record(self) -> Result<PriceRecord, PersistenceError> {
        let region = self
            .region
            .parse::<Region>()
            .map_err(PersistenceError::Corrupt)?;
        let hour = u32::try_from(self.hour)
            .map_err(|_| PersistenceError::Corrupt(format!("negative hour {}", self.hour)))?;
        let tariffs = Tariffs {
            transmission: decimal(&self.transmission_tariff)?,
            system: decimal(&self.system_tariff)?,
            electricity_tax: decimal(&self.electricity_tax)?,
        };
        PriceRecord::new(region, self.price_date, hour, decimal(&self.spot_price)?, &tariffs)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }
}

fn decimal(raw: &str) -> Result<Decimal, PersistenceError> {
    raw.parse()
        .map_err(|e| PersistenceError::Corrupt(format!("{raw:?} is not a decimal: {e}")))
}
