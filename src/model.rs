use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::{config::Tariffs, normalize::NormalizationError};

/// Fractional digits kept on every price component.
pub const PRICE_SCALE: u32 = 6;

/// Danish bidding zones quoted by the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// West Denmark
    Dk1,
    /// East Denmark
    Dk2,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Dk1 => "DK1",
            Region::Dk2 => "DK2",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DK1" => Ok(Region::Dk1),
            "DK2" => Ok(Region::Dk2),
            other => Err(format!("unknown region {other:?}, expected DK1 or DK2")),
        }
    }
}

/// One upstream price interval as received, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// DKK per kWh
    pub price: Decimal,
    pub interval_start: DateTime<FixedOffset>,
}

/// Price of one local wall-clock hour in one region.
///
/// The total is recomputed by every constructor and updater, so it always equals the
/// sum of the four components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    region: Region,
    price_date: NaiveDate,
    hour: u32,
    price_date_time: NaiveDateTime,
    spot_price: Decimal,
    transmission_tariff: Decimal,
    system_tariff: Decimal,
    electricity_tax: Decimal,
    total_price: Decimal,
}

impl PriceRecord {
    pub fn new(
        region: Region,
        price_date: NaiveDate,
        hour: u32,
        spot_price: Decimal,
        tariffs: &Tariffs,
    ) -> Result<Self, NormalizationError> {
        let time = NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or(NormalizationError::InvalidHour { hour })?;

        let mut record = Self {
            region,
            price_date,
            hour,
            price_date_time: price_date.and_time(time),
            spot_price: Decimal::ZERO,
            transmission_tariff: Decimal::ZERO,
            system_tariff: Decimal::ZERO,
            electricity_tax: Decimal::ZERO,
            total_price: Decimal::ZERO,
        };
        record.set_components(spot_price, tariffs);
        Ok(record)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn price_date(&self) -> NaiveDate {
        self.price_date
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn price_date_time(&self) -> NaiveDateTime {
        self.price_date_time
    }

    pub fn spot_price(&self) -> Decimal {
        self.spot_price
    }

    pub fn transmission_tariff(&self) -> Decimal {
        self.transmission_tariff
    }

    pub fn system_tariff(&self) -> Decimal {
        self.system_tariff
    }

    pub fn electricity_tax(&self) -> Decimal {
        self.electricity_tax
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }

    /// The tariff components of this record.
    pub fn tariffs(&self) -> Tariffs {
        Tariffs {
            transmission: self.transmission_tariff,
            system: self.system_tariff,
            electricity_tax: self.electricity_tax,
        }
    }

    pub fn with_spot_price(mut self, spot_price: Decimal) -> Self {
        let tariffs = self.tariffs();
        self.set_components(spot_price, &tariffs);
        self
    }

    pub fn with_tariffs(mut self, tariffs: &Tariffs) -> Self {
        let spot = self.spot_price;
        self.set_components(spot, tariffs);
        self
    }

    fn set_components(&mut self, spot_price: Decimal, tariffs: &Tariffs) {
        self.spot_price = spot_price.round_dp(PRICE_SCALE);
        self.transmission_tariff = tariffs.transmission.round_dp(PRICE_SCALE);
        self.system_tariff = tariffs.system.round_dp(PRICE_SCALE);
        self.electricity_tax = tariffs.electricity_tax.round_dp(PRICE_SCALE);
        self.total_price = self.spot_price
            + self.transmission_tariff
            + self.system_tariff
            + self.electricity_tax;
    }
}
