use std::fmt;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    db::{PersistenceError, PriceStore},
    model::{PriceRecord, Region, PRICE_SCALE},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourPrice {
    pub hour: u32,
    pub total_price: Decimal,
}

/// Price overview of one region's day, on total prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySummary {
    pub region: Region,
    pub date: NaiveDate,
    pub hours: usize,
    pub average: Decimal,
    pub cheapest: HourPrice,
    pub most_expensive: HourPrice,
}

impl DailySummary {
    pub fn from_records(
        region: Region,
        date: NaiveDate,
        records: &[PriceRecord],
    ) -> Option<DailySummary> {
        let day: Vec<&PriceRecord> = records
            .iter()
            .filter(|r| r.region() == region && r.price_date() == date)
            .collect();

        // ties resolve to the earliest hour
        let cheapest = day.iter().min_by_key(|r| (r.total_price(), r.hour()))?;
        let most_expensive = day
            .iter()
            .max_by_key(|r| (r.total_price(), std::cmp::Reverse(r.hour())))?;

        let sum: Decimal = day.iter().map(|r| r.total_price()).sum();
        let average = (sum / Decimal::from(day.len())).round_dp(PRICE_SCALE);

        Some(DailySummary {
            region,
            date,
            hours: day.len(),
            average,
            cheapest: HourPrice {
                hour: cheapest.hour(),
                total_price: cheapest.total_price(),
            },
            most_expensive: HourPrice {
                hour: most_expensive.hour(),
                total_price: most_expensive.total_price(),
            },
        })
    }
}

impl fmt::Display for DailySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}h, avg {} | {}@{:02}:00..{}@{:02}:00 DKK/kWh",
            self.region,
            self.date,
            self.hours,
            display_price(self.average),
            display_price(self.cheapest.total_price),
            self.cheapest.hour,
            display_price(self.most_expensive.total_price),
            self.most_expensive.hour
        )
    }
}

fn display_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

pub async fn daily_summary(
    store: &dyn PriceStore,
    region: Region,
    date: NaiveDate,
) -> Result<Option<DailySummary>, PersistenceError> {
    let records = store.find_by_region_and_date(region, date).await?;
    Ok(DailySummary::from_records(region, date, &records))
}

/// Stored price for one local hour, if any.
pub async fn price_at(
    store: &dyn PriceStore,
    region: Region,
    date: NaiveDate,
    hour: u32,
) -> Result<Option<PriceRecord>, PersistenceError> {
    let records = store.find_by_region_and_date(region, date).await?;
    Ok(records.into_iter().find(|r| r.hour() == hour))
}
