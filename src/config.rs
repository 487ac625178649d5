use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::model::Region;

pub const DEFAULT_API_BASE_URL: &str = "https://www.elprisenligenu.dk/api/v1/prices";

/// Fixed per-kWh charges added on top of the spot price, in DKK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tariffs {
    pub transmission: Decimal,
    pub system: Decimal,
    pub electricity_tax: Decimal,
}

impl Default for Tariffs {
    fn default() -> Self {
        Self {
            transmission: Decimal::new(58, 3),
            system: Decimal::new(125, 4),
            electricity_tax: Decimal::new(90, 3),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: String,
    pub api_base_url: String,
    pub regions: Vec<Region>,
    pub timezone: Tz,
    pub tariffs: Tariffs,
    pub request_timeout: Duration,
    pub retention_days: i64,
    pub publication_time: NaiveTime,
    pub fetch_today_at: NaiveTime,
    pub fetch_tomorrow_at: NaiveTime,
    pub backup_at: NaiveTime,
    pub cleanup_at: NaiveTime,
    pub fetch_on_startup: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let defaults = Tariffs::default();

        Ok(Config {
            db_path: var("DB_PATH", "prices.db"),
            api_base_url: var("API_BASE_URL", DEFAULT_API_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            regions: parse_regions(&var("REGIONS", "DK1,DK2"))?,
            timezone: var("MARKET_TIMEZONE", "Europe/Copenhagen")
                .parse::<Tz>()
                .map_err(|e| anyhow!("MARKET_TIMEZONE must be an IANA zone name: {e}"))?,
            tariffs: Tariffs {
                transmission: lookup_parsed(&lookup, "TRANSMISSION_TARIFF", defaults.transmission)?,
                system: lookup_parsed(&lookup, "SYSTEM_TARIFF", defaults.system)?,
                electricity_tax: lookup_parsed(&lookup, "ELECTRICITY_TAX", defaults.electricity_tax)?,
            },
            request_timeout: Duration::from_secs(
                var("REQUEST_TIMEOUT_SECS", "10")
                    .parse()
                    .context("REQUEST_TIMEOUT_SECS must be a number of seconds")?,
            ),
            retention_days: parse_retention_days(&var("RETENTION_DAYS", "30"))?,
            publication_time: parse_time("PUBLICATION_TIME", &var("PUBLICATION_TIME", "13:00"))?,
            fetch_today_at: parse_time("FETCH_TODAY_AT", &var("FETCH_TODAY_AT", "13:05"))?,
            fetch_tomorrow_at: parse_time("FETCH_TOMORROW_AT", &var("FETCH_TOMORROW_AT", "13:10"))?,
            backup_at: parse_time("BACKUP_AT", &var("BACKUP_AT", "13:15"))?,
            cleanup_at: parse_time("CLEANUP_AT", &var("CLEANUP_AT", "00:00"))?,
            fetch_on_startup: var("FETCH_ON_STARTUP", "true")
                .parse()
                .context("FETCH_ON_STARTUP must be true or false")?,
        })
    }
}

fn lookup_parsed<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a decimal number, got {raw:?}")),
        None => Ok(default),
    }
}

fn parse_regions(raw: &str) -> Result<Vec<Region>> {
    let mut regions = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let region = part.parse::<Region>().map_err(|e| anyhow!("REGIONS: {e}"))?;
        if !regions.contains(&region) {
            regions.push(region);
        }
    }
    if regions.is_empty() {
        return Err(anyhow!("REGIONS must name at least one region"));
    }
    Ok(regions)
}

fn parse_time(key: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("{key} must be a local time as HH:MM, got {raw:?}"))
}

/// A cutoff in the future would delete upcoming prices.
fn parse_retention_days(raw: &str) -> Result<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("RETENTION_DAYS must be a number of days, got {raw:?}"))?;
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(anyhow!(
            "RETENTION_DAYS must be between 1 and {MAX_RETENTION_DAYS}, got {days}"
        ));
    }
    Ok(days)
}

const MAX_RETENTION_DAYS: i64 = 36_500;
