use std::{fmt, future::Future, sync::Arc};

use anyhow::Context;
use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    db::PriceStore,
    ingest::{IngestionReport, Ingestor, RegionStatus},
    summary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    FetchToday,
    FetchTomorrow,
    /// Re-runs both fetches in case an earlier firing was missed or failed.
    Backup,
    Cleanup,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Job::FetchToday => "fetch-today",
            Job::FetchTomorrow => "fetch-tomorrow",
            Job::Backup => "backup",
            Job::Cleanup => "cleanup",
        })
    }
}

#[derive(Clone)]
pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    store: Arc<dyn PriceStore>,
    timezone: Tz,
    publication_time: NaiveTime,
    retention_days: i64,
}

impl Scheduler {
    pub fn new(ingestor: Arc<Ingestor>, store: Arc<dyn PriceStore>, config: &Config) -> Self {
        Self {
            ingestor,
            store,
            timezone: config.timezone,
            publication_time: config.publication_time,
            retention_days: config.retention_days,
        }
    }

    /// Starts one independent timer task per job.
    pub fn spawn(&self, config: &Config) -> Vec<JoinHandle<()>> {
        [
            (Job::FetchToday, config.fetch_today_at),
            (Job::FetchTomorrow, config.fetch_tomorrow_at),
            (Job::Backup, config.backup_at),
            (Job::Cleanup, config.cleanup_at),
        ]
        .into_iter()
        .map(|(job, at)| self.spawn_job(job, at))
        .collect()
    }

    fn spawn_job(&self, job: Job, at: NaiveTime) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut last_target = None;
            loop {
                let now = Utc::now();
                let next = next_after(now, last_target, at, scheduler.timezone);
                last_target = Some(next);
                let sleep_duration = (next - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                info!(
                    "Next {job} run at {} (sleeping {}s)",
                    next.with_timezone(&scheduler.timezone),
                    sleep_duration.as_secs()
                );
                tokio::time::sleep(sleep_duration).await;

                let runner = scheduler.clone();
                run_guarded(job, async move { runner.run(job).await }).await;
            }
        })
    }

    pub async fn run(&self, job: Job) -> anyhow::Result<()> {
        info!("Scheduled task: {job}");
        match job {
            Job::FetchToday => {
                let report = self.ingestor.ingest_today().await;
                self.log_report(job, &report).await;
            }
            Job::FetchTomorrow => {
                let report = self.ingestor.ingest_tomorrow().await;
                self.log_report(job, &report).await;
            }
            Job::Backup => {
                let today = self.ingestor.ingest_today().await;
                self.log_report(job, &today).await;
                let tomorrow = self.ingestor.ingest_tomorrow().await;
                self.log_report(job, &tomorrow).await;
            }
            Job::Cleanup => {
                let cutoff = retention_cutoff(Utc::now(), self.timezone, self.retention_days)
                    .with_context(|| {
                        format!("retention of {} days is out of range", self.retention_days)
                    })?;
                let deleted = self.store.delete_older_than(cutoff).await?;
                info!("Deleted {deleted} prices older than {cutoff}");
            }
        }
        Ok(())
    }

    async fn log_report(&self, job: Job, report: &IngestionReport) {
        let local_now = Utc::now().with_timezone(&self.timezone);
        self.log_report_at(job, report, local_now).await
    }

    /// Outcomes for a day that is not published yet are expected and logged at info.
    async fn log_report_at(&self, job: Job, report: &IngestionReport, local_now: DateTime<Tz>) {
        let pending = !is_published(
            report.date,
            local_now.date_naive(),
            local_now.time(),
            self.publication_time,
        );

        for region in &report.regions {
            match &region.status {
                RegionStatus::Ok => info!("{job} {}: {region}", report.date),
                RegionStatus::Empty | RegionStatus::Failed { .. } if pending => info!(
                    "{job} {}: prices for {} not published yet ({region})",
                    report.date, region.region
                ),
                RegionStatus::Empty => warn!("{job} {}: {region}", report.date),
                RegionStatus::Failed { .. } => error!("{job} {}: {region}", report.date),
            }

            if region.saved > 0 {
                match summary::daily_summary(self.store.as_ref(), region.region, report.date).await
                {
                    Ok(Some(summary)) => info!("{summary}"),
                    Ok(None) => {}
                    Err(e) => warn!("Could not summarize {} {}: {e}", region.region, report.date),
                }
            }
        }
    }
}

/// Runs one job firing in its own task so an error or panic ends only that firing.
pub async fn run_guarded<F>(job: Job, fut: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(Ok(())) => info!("Scheduled task {job} finished"),
        Ok(Err(e)) => error!("Scheduled task {job} failed: {e:#}"),
        Err(e) => error!("Scheduled task {job} aborted: {e}"),
    }
}

/// Next instant strictly after `now` at which the market's wall clock shows `at`.
///
/// A time skipped by a DST jump fires one hour later on the wall clock; a time that
/// occurs twice fires on its first occurrence.
pub fn next_run(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    loop {
        if let Some(candidate) = local_instant(date, at, tz) {
            if candidate > now {
                return candidate;
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => return now,
        };
    }
}

/// Like [`next_run`], but never at or before the previous target, so a wall clock that
/// lags the timer cannot fire the same occurrence twice.
pub fn next_after(
    now: DateTime<Utc>,
    last_target: Option<DateTime<Utc>>,
    at: NaiveTime,
    tz: Tz,
) -> DateTime<Utc> {
    let from = last_target.map_or(now, |last| last.max(now));
    next_run(from, at, tz)
}

fn local_instant(date: NaiveDate, at: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(at);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// Records starting before this local wall-clock instant are past retention. `None`
/// when the retention reaches outside the representable calendar.
pub fn retention_cutoff(
    now: DateTime<Utc>,
    tz: Tz,
    retention_days: i64,
) -> Option<chrono::NaiveDateTime> {
    let retention = TimeDelta::try_days(retention_days)?;
    now.with_timezone(&tz)
        .naive_local()
        .checked_sub_signed(retention)
}

/// Whether upstream is expected to have prices for `date` by now. Next-day prices
/// appear at the publication time.
pub fn is_published(
    date: NaiveDate,
    today: NaiveDate,
    local_time: NaiveTime,
    publication_time: NaiveTime,
) -> bool {
    if date <= today {
        return true;
    }
    date == today.succ_opt().unwrap_or(today) && local_time >= publication_time
}
