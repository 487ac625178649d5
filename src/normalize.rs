use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, Timelike};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    config::Tariffs,
    model::{PriceRecord, RawSample, Region, PRICE_SCALE},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("interval starting at {local_time} is not aligned to a whole hour")]
    NotHourAligned { local_time: String },
    #[error("interval starting on {local_date} does not belong to {for_date}")]
    OutsideTargetDay {
        local_date: NaiveDate,
        for_date: NaiveDate,
    },
    #[error("hour {hour} is outside 0-23")]
    InvalidHour { hour: u32 },
}

/// Turns upstream samples into price records for one market timezone.
#[derive(Clone, Debug)]
pub struct Normalizer {
    timezone: Tz,
    tariffs: Tariffs,
}

impl Normalizer {
    pub fn new(timezone: Tz, tariffs: Tariffs) -> Self {
        Self { timezone, tariffs }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Averages the quarter-hour samples of each local hour into one sample starting on
    /// the hour, ordered by instant.
    ///
    /// Hourly samples pass through as a group of one. Samples off the quarter-hour grid are
    /// appended unchanged so `normalize` rejects them.
    pub fn hourly(&self, samples: &[RawSample]) -> Vec<RawSample> {
        let mut hours: BTreeMap<DateTime<FixedOffset>, (Decimal, u32)> = BTreeMap::new();
        let mut off_grid = Vec::new();

        for sample in samples {
            let local = sample.interval_start.with_timezone(&self.timezone);
            if local.minute() % 15 != 0 || local.second() != 0 || local.nanosecond() != 0 {
                off_grid.push(sample.clone());
                continue;
            }
            // the two repeated hours of a DST fall-back are different instants
            let hour_start = (local - TimeDelta::minutes(i64::from(local.minute()))).fixed_offset();
            let (sum, count) = hours.entry(hour_start).or_insert((Decimal::ZERO, 0));
            *sum += sample.price;
            *count += 1;
        }

        hours
            .into_iter()
            .map(|(interval_start, (sum, count))| RawSample {
                price: (sum / Decimal::from(count)).round_dp(PRICE_SCALE),
                interval_start,
            })
            .chain(off_grid)
            .collect()
    }

    /// The hour comes from the sample's start converted into the market zone, while the
    /// record is always filed under `for_date`.
    pub fn normalize(
        &self,
        sample: &RawSample,
        region: Region,
        for_date: NaiveDate,
    ) -> Result<PriceRecord, NormalizationError> {
        let local = sample.interval_start.with_timezone(&self.timezone);

        if local.minute() != 0 || local.second() != 0 {
            return Err(NormalizationError::NotHourAligned {
                local_time: local.to_rfc3339(),
            });
        }

        let local_date = local.date_naive();
        if (local_date - for_date).num_days().abs() > 1 {
            return Err(NormalizationError::OutsideTargetDay {
                local_date,
                for_date,
            });
        }

        PriceRecord::new(region, for_date, local.hour(), sample.price, &self.tariffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    fn normalizer() -> Normalizer {
        Normalizer::new(chrono_tz::Europe::Copenhagen, Tariffs::default())
    }

    fn sample(start: &str) -> RawSample {
        RawSample {
            price: dec!(0.75),
            interval_start: DateTime::parse_from_rfc3339(start).unwrap(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn local_offset_timestamp_maps_to_local_hour() {
        let record = normalizer()
            .normalize(&sample("2025-09-21T00:00:00+02:00"), Region::Dk1, day(2025, 9, 21))
            .unwrap();

        assert_eq!(record.hour(), 0);
        assert_eq!(record.price_date(), day(2025, 9, 21));
        assert_eq!(
            record.price_date_time(),
            day(2025, 9, 21).and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn utc_timestamp_is_converted_to_market_zone() {
        let record = normalizer()
            .normalize(&sample("2025-09-20T22:00:00Z"), Region::Dk1, day(2025, 9, 21))
            .unwrap();
        assert_eq!(record.hour(), 0);

        let record = normalizer()
            .normalize(&sample("2025-01-15T11:00:00+00:00"), Region::Dk2, day(2025, 1, 15))
            .unwrap();
        assert_eq!(record.hour(), 12);
    }

    #[test]
    fn price_date_is_pinned_to_requested_day() {
        let record = normalizer()
            .normalize(&sample("2025-09-20T23:00:00+02:00"), Region::Dk1, day(2025, 9, 21))
            .unwrap();

        assert_eq!(record.price_date(), day(2025, 9, 21));
        assert_eq!(record.hour(), 23);
    }

    #[test]
    fn daylight_saving_transitions() {
        let n = normalizer();
        let spring = day(2025, 3, 30);
        let after_gap = n
            .normalize(&sample("2025-03-30T01:00:00+00:00"), Region::Dk1, spring)
            .unwrap();
        assert_eq!(after_gap.hour(), 3);

        let autumn = day(2025, 10, 26);
        let first = n
            .normalize(&sample("2025-10-26T02:00:00+02:00"), Region::Dk1, autumn)
            .unwrap();
        let second = n
            .normalize(&sample("2025-10-26T02:00:00+01:00"), Region::Dk1, autumn)
            .unwrap();
        assert_eq!(first.hour(), 2);
        assert_eq!(second.hour(), 2);
        assert_eq!(first.price_date_time(), second.price_date_time());
    }

    #[test]
    fn applies_configured_tariffs() {
        let n = Normalizer::new(
            chrono_tz::Europe::Copenhagen,
            Tariffs {
                transmission: dec!(0.1),
                system: dec!(0.01),
                electricity_tax: dec!(0.7),
            },
        );
        let record = n
            .normalize(&sample("2025-09-21T08:00:00+02:00"), Region::Dk2, day(2025, 9, 21))
            .unwrap();
        assert_eq!(record.total_price(), dec!(1.56));
    }

    #[test]
    fn rejects_quarter_hour_intervals() {
        let err = normalizer()
            .normalize(&sample("2025-10-01T00:15:00+02:00"), Region::Dk1, day(2025, 10, 1))
            .unwrap_err();
        assert!(matches!(err, NormalizationError::NotHourAligned { .. }));
    }

    #[test]
    fn quarter_hours_average_into_their_hour() {
        let priced = |start: &str, price: Decimal| RawSample {
            price,
            interval_start: DateTime::parse_from_rfc3339(start).unwrap(),
        };
        let samples = vec![
            priced("2025-10-01T00:00:00+02:00", dec!(0.40)),
            priced("2025-10-01T00:15:00+02:00", dec!(0.50)),
            priced("2025-10-01T00:30:00+02:00", dec!(0.60)),
            priced("2025-10-01T00:45:00+02:00", dec!(0.71)),
            priced("2025-09-30T23:00:00Z", dec!(0.2)),
            priced("2025-10-01T01:15:00+02:00", dec!(0.1)),
            priced("2025-10-01T02:07:00+02:00", dec!(9.9)),
        ];

        let hourly = normalizer().hourly(&samples);

        assert_eq!(hourly.len(), 3);
        assert_eq!(hourly[0], priced("2025-10-01T00:00:00+02:00", dec!(0.5525)));
        assert_eq!(hourly[1].price, dec!(0.15));
        assert_eq!(
            hourly[1].interval_start,
            DateTime::parse_from_rfc3339("2025-10-01T01:00:00+02:00").unwrap()
        );
        assert_eq!(hourly[2].price, dec!(9.9));

        let err = normalizer()
            .normalize(&hourly[2], Region::Dk1, day(2025, 10, 1))
            .unwrap_err();
        assert!(matches!(err, NormalizationError::NotHourAligned { .. }));
    }

    #[test]
    fn repeated_fall_back_hours_stay_apart() {
        let samples = vec![
            sample("2025-10-26T02:00:00+02:00"),
            sample("2025-10-26T02:30:00+02:00"),
            sample("2025-10-26T02:00:00+01:00"),
            sample("2025-10-26T02:30:00+01:00"),
        ];

        let hourly = normalizer().hourly(&samples);

        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].interval_start.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(hourly[1].interval_start.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn rejects_samples_from_another_day() {
        let err = normalizer()
            .normalize(&sample("2025-09-25T10:00:00+02:00"), Region::Dk1, day(2025, 9, 21))
            .unwrap_err();
        assert_eq!(
            err,
            NormalizationError::OutsideTargetDay {
                local_date: day(2025, 9, 25),
                for_date: day(2025, 9, 21),
            }
        );
    }
}
