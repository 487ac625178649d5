use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{RawSample, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Status,
    Malformed,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("malformed price payload from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } => FetchErrorKind::Network,
            FetchError::Status { .. } => FetchErrorKind::Status,
            FetchError::Malformed { .. } => FetchErrorKind::Malformed,
        }
    }
}

/// Source of day-ahead spot prices for one (date, region).
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch(&self, date: NaiveDate, region: Region) -> Result<Vec<RawSample>, FetchError>;
}

/// Entry of the elprisenligenu.dk price feed. Fields we don't use are ignored.
#[derive(Debug, Deserialize)]
struct PriceEntry {
    #[serde(rename = "DKK_per_kWh")]
    dkk_per_kwh: Decimal,
    time_start: DateTime<FixedOffset>,
}

#[derive(Clone, Debug)]
pub struct ElprisClient {
    client: reqwest::Client,
    base_url: String,
}

impl ElprisClient {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, date: NaiveDate, region: Region) -> String {
        format!("{}/{}_{}.json", self.base_url, date.format("%Y/%m-%d"), region)
    }
}

#[async_trait]
impl MarketData for ElprisClient {
    async fn fetch(&self, date: NaiveDate, region: Region) -> Result<Vec<RawSample>, FetchError> {
        let url = self.url_for(date, region);
        tracing::debug!("Fetching prices from {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        let body = resp.bytes().await.map_err(|source| FetchError::Network {
            url: url.clone(),
            source,
        })?;
        tracing::trace!("Price response: {} bytes", body.len());

        parse_prices(&body).map_err(|source| FetchError::Malformed { url, source })
    }
}

fn parse_prices(body: &[u8]) -> Result<Vec<RawSample>, serde_json::Error> {
    let entries: Vec<PriceEntry> = serde_json::from_slice(body)?;
    Ok(entries
        .into_iter()
        .map(|entry| RawSample {
            price: entry.dkk_per_kwh,
            interval_start: entry.time_start,
        })
        .collect())
}
