// ⏰ Discount Windows - explicit time arithmetic
//
// All bounds are derived from one reference instant `now`:
//
//   discount_end   = now - 1 calendar year
//   discount_start = discount_end - 180 days      ("18 months")
//
//   |---- expired ----|---- discount window ----|---- full price ----|
//                discount_start            discount_end             now
//
// The start is built in two steps on purpose: calendar and fixed-day
// arithmetic diverge around leap years, and the stored data was classified
// with exactly this construction.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Extra offset applied after the one-year step to reach the window start
pub const DISCOUNT_EXTRA_DAYS: i64 = 180;

/// `now` minus one calendar year. Feb 29 rolls over to Mar 1 of the previous year.
fn one_year_before(now: DateTime<Utc>) -> DateTime<Utc> {
    let year = now.year() - 1;

    now.with_year(year)
        .or_else(|| {
            now.with_day(1)
                .and_then(|d| d.with_month(3))
                .and_then(|d| d.with_year(year))
        })
        .unwrap_or(now - Duration::days(365))
}

// ============================================================================
// REGISTRATION RANGE
// ============================================================================

/// Half-open range `[from, until)` over first-registration dates.
/// A missing `from` is unbounded below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRange {
    pub from: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl RegistrationRange {
    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        RegistrationRange { from: Some(from), until }
    }

    pub fn before(until: DateTime<Utc>) -> Self {
        RegistrationRange { from: None, until }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| from <= date) && date < self.until
    }
}

// ============================================================================
// DISCOUNT WINDOWS
// ============================================================================

/// Window bounds evaluated at one reference instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountWindows {
    pub now: DateTime<Utc>,
    pub discount_start: DateTime<Utc>,
    pub discount_end: DateTime<Utc>,
}

impl DiscountWindows {
    pub fn at(now: DateTime<Utc>) -> Self {
        let discount_end = one_year_before(now);
        let discount_start = discount_end - Duration::days(DISCOUNT_EXTRA_DAYS);

        DiscountWindows {
            now,
            discount_start,
            discount_end,
        }
    }

    pub fn current() -> Self {
        Self::at(Utc::now())
    }

    /// Registrations that qualify for a discount right now
    pub fn discount_range(&self) -> RegistrationRange {
        RegistrationRange::between(self.discount_start, self.discount_end)
    }

    /// Registrations that no longer justify a running discount
    pub fn undiscount_range(&self) -> RegistrationRange {
        RegistrationRange::before(self.discount_end)
    }

    /// Owners purchased before this instant are pruned
    pub fn owner_retention_cutoff(&self) -> DateTime<Utc> {
        self.discount_start
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_bounds_two_step_construction() {
        let windows = DiscountWindows::at(utc(2025, 10, 15));

        assert_eq!(windows.discount_end, utc(2024, 10, 15));
        assert_eq!(windows.discount_start, utc(2024, 4, 18));
        assert_eq!(windows.owner_retention_cutoff(), windows.discount_start);
    }

    #[test]
    fn test_leap_day_rolls_over_before_subtracting_days() {
        let windows = DiscountWindows::at(utc(2024, 2, 29));

        assert_eq!(windows.discount_end, utc(2023, 3, 1));
        assert_eq!(windows.discount_start, utc(2022, 9, 2));
    }

    #[test]
    fn test_leap_day_in_previous_year_is_kept() {
        let windows = DiscountWindows::at(utc(2025, 2, 28));

        assert_eq!(windows.discount_end, utc(2024, 2, 28));
    }

    #[test]
    fn test_range_is_half_open() {
        let range = RegistrationRange::between(utc(2024, 1, 1), utc(2024, 6, 1));

        assert!(range.contains(utc(2024, 1, 1)));
        assert!(range.contains(utc(2024, 3, 1)));
        assert!(!range.contains(utc(2024, 6, 1)));
        assert!(!range.contains(utc(2023, 12, 31)));
    }

    #[test]
    fn test_unbounded_range() {
        let range = RegistrationRange::before(utc(2024, 6, 1));

        assert!(range.contains(utc(1990, 1, 1)));
        assert!(!range.contains(utc(2024, 6, 2)));
    }
}
