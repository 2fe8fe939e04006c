//! Time bucketing

use chrono::{Datelike, Days, NaiveDate};
use tally_ir::{TimeBucket, TimeGrain};

/// Truncate a date to the start of its grain
///
/// Weekly buckets start on the ISO Monday, quarterly on months 1, 4, 7 and 10.
/// `TimeGrain::None` keeps the date itself.
pub fn truncate(date: NaiveDate, grain: TimeGrain) -> NaiveDate {
    match grain {
        TimeGrain::None | TimeGrain::Daily => date,
        TimeGrain::Weekly => {
            let back = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(back)).unwrap_or(date)
        }
        TimeGrain::Monthly => date.with_day(1).unwrap_or(date),
        TimeGrain::Quarterly => {
            let first_month = date.month0() / 3 * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), first_month, 1).unwrap_or(date)
        }
    }
}

pub fn bucket_of(date: NaiveDate, grain: TimeGrain) -> TimeBucket {
    TimeBucket::new(grain, truncate(date, grain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekly_truncates_to_monday() {
        // 2024-01-17 is a Wednesday
        assert_eq!(truncate(date(2024, 1, 17), TimeGrain::Weekly), date(2024, 1, 15));
        assert_eq!(truncate(date(2024, 1, 15), TimeGrain::Weekly), date(2024, 1, 15));
        // Sunday belongs to the week that started the previous Monday
        assert_eq!(truncate(date(2024, 1, 21), TimeGrain::Weekly), date(2024, 1, 15));
        // Weeks cross year boundaries
        assert_eq!(truncate(date(2025, 1, 1), TimeGrain::Weekly), date(2024, 12, 30));
    }

    #[test]
    fn test_month_boundary_starts_new_month() {
        assert_eq!(truncate(date(2024, 2, 1), TimeGrain::Monthly), date(2024, 2, 1));
        assert_eq!(truncate(date(2024, 1, 31), TimeGrain::Monthly), date(2024, 1, 1));
    }

    #[test]
    fn test_quarter_starts() {
        assert_eq!(truncate(date(2024, 3, 31), TimeGrain::Quarterly), date(2024, 1, 1));
        assert_eq!(truncate(date(2024, 4, 1), TimeGrain::Quarterly), date(2024, 4, 1));
        assert_eq!(truncate(date(2024, 9, 15), TimeGrain::Quarterly), date(2024, 7, 1));
        assert_eq!(truncate(date(2024, 12, 31), TimeGrain::Quarterly), date(2024, 10, 1));
    }

    #[test]
    fn test_bucket_label() {
        assert_eq!(bucket_of(date(2024, 5, 20), TimeGrain::Quarterly).label(), "2024Q2");
        assert_eq!(bucket_of(date(2024, 5, 20), TimeGrain::Monthly).label(), "2024-05");
    }
}
