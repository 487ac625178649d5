use std::{collections::HashSet, fmt, sync::Arc};

use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info};

use crate::{
    db::{PersistenceError, PriceStore},
    electricity::MarketData,
    model::Region,
    normalize::Normalizer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionStatus {
    Ok,
    /// Upstream answered with a well-formed but empty day.
    Empty,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    pub region: Region,
    /// Upstream intervals received. The other counts are in hours, after quarter-hour
    /// intervals are averaged.
    pub fetched: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub status: RegionStatus,
}

impl RegionReport {
    fn new(region: Region) -> Self {
        Self {
            region,
            fetched: 0,
            saved: 0,
            duplicates: 0,
            rejected: 0,
            status: RegionStatus::Ok,
        }
    }

    fn failed(mut self, reason: impl ToString) -> Self {
        self.status = RegionStatus::Failed {
            reason: reason.to_string(),
        };
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RegionStatus::Failed { .. })
    }
}

impl fmt::Display for RegionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: fetched {}, saved {}, duplicates {}, rejected {}",
            self.region, self.fetched, self.saved, self.duplicates, self.rejected
        )?;
        match &self.status {
            RegionStatus::Ok => Ok(()),
            RegionStatus::Empty => write!(f, " (no prices published)"),
            RegionStatus::Failed { reason } => write!(f, " (failed: {reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub date: NaiveDate,
    pub regions: Vec<RegionReport>,
}

impl IngestionReport {
    pub fn total_saved(&self) -> usize {
        self.regions.iter().map(|r| r.saved).sum()
    }

    pub fn failed_regions(&self) -> Vec<Region> {
        self.regions
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.region)
            .collect()
    }

    pub fn region(&self, region: Region) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region == region)
    }
}

impl fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date)?;
        for region in &self.regions {
            write!(f, " | {region}")?;
        }
        Ok(())
    }
}

/// Fetches, normalizes, dedups and stores prices for the configured regions.
pub struct Ingestor {
    client: Arc<dyn MarketData>,
    store: Arc<dyn PriceStore>,
    normalizer: Normalizer,
    regions: Vec<Region>,
}

impl Ingestor {
    pub fn new(
        client: Arc<dyn MarketData>,
        store: Arc<dyn PriceStore>,
        normalizer: Normalizer,
        regions: Vec<Region>,
    ) -> Self {
        Self {
            client,
            store,
            normalizer,
            regions,
        }
    }

    /// Current calendar date in the market timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.normalizer.timezone()).date_naive()
    }

    pub async fn ingest_today(&self) -> IngestionReport {
        self.ingest(self.today(), &self.regions).await
    }

    pub async fn ingest_tomorrow(&self) -> IngestionReport {
        let today = self.today();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        self.ingest(tomorrow, &self.regions).await
    }

    /// A failing region never stops the others; its report carries the reason.
    pub async fn ingest(&self, date: NaiveDate, regions: &[Region]) -> IngestionReport {
        let mut reports = Vec::with_capacity(regions.len());
        for &region in regions {
            let report = self.ingest_region(date, region).await;
            // the caller picks the severity
            debug!("Ingested {date} {report}");
            reports.push(report);
        }
        IngestionReport {
            date,
            regions: reports,
        }
    }

    /// Drops everything stored for the region and date, then ingests it again.
    ///
    /// Library API for operator tooling; neither the scheduler nor the binary calls it.
    pub async fn refresh(
        &self,
        date: NaiveDate,
        region: Region,
    ) -> Result<RegionReport, PersistenceError> {
        let deleted = self.store.delete_by_region_and_date(region, date).await?;
        info!("Deleted {deleted} prices for {region} on {date} before refresh");
        Ok(self.ingest_region(date, region).await)
    }

    async fn ingest_region(&self, date: NaiveDate, region: Region) -> RegionReport {
        let mut report = RegionReport::new(region);

        let samples = match self.client.fetch(date, region).await {
            Ok(samples) => samples,
            Err(e) => return report.failed(e),
        };
        report.fetched = samples.len();
        if samples.is_empty() {
            report.status = RegionStatus::Empty;
            return report;
        }

        let mut seen = HashSet::new();
        let mut to_save = Vec::new();
        for sample in &self.normalizer.hourly(&samples) {
            let record = match self.normalizer.normalize(sample, region, date) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping {region} sample at {}: {e}", sample.interval_start);
                    report.rejected += 1;
                    continue;
                }
            };

            // DST fall-back yields the same local hour twice
            if !seen.insert(record.price_date_time()) {
                report.duplicates += 1;
                continue;
            }

            match self.store.exists(region, record.price_date_time()).await {
                Ok(true) => report.duplicates += 1,
                Ok(false) => to_save.push(record),
                Err(e) => return report.failed(e),
            }
        }

        if report.rejected > 0 {
            debug!(
                "Rejected {}/{} {region} samples for {date}",
                report.rejected, report.fetched
            );
        }

        if !to_save.is_empty() {
            match self.store.save_all(&to_save).await {
                Ok(saved) => {
                    report.saved = saved.len();
                    report.duplicates += to_save.len() - saved.len();
                }
                Err(e) => return report.failed(e),
            }
        }

        report
    }
}
