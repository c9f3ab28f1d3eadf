use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open reporting window `[start, end)`, anchored on salary dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportingPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        ReportingPeriod { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Whole days from the period start to `as_of`, never less than 1 so it
    /// is always safe as a burn-rate divisor.
    pub fn days_elapsed(&self, as_of: DateTime<Utc>) -> i64 {
        (as_of - self.start).num_days().max(1)
    }

    /// Whole days from `as_of` to the period end, clamped at 0.
    pub fn days_remaining(&self, as_of: DateTime<Utc>) -> i64 {
        (self.end - as_of).num_days().max(0)
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn contains_is_half_open() {
        let p = ReportingPeriod::new(at(2024, 3, 1), at(2024, 3, 31));
        assert!(p.contains(at(2024, 3, 1)));
        assert!(p.contains(at(2024, 3, 15)));
        assert!(!p.contains(at(2024, 3, 31)));
        assert!(!p.contains(at(2024, 2, 29)));
    }

    #[test]
    fn days_elapsed_floors_at_one() {
        let p = ReportingPeriod::new(at(2024, 3, 1), at(2024, 3, 31));
        assert_eq!(p.days_elapsed(at(2024, 3, 1)), 1);
        assert_eq!(p.days_elapsed(at(2024, 3, 11)), 10);
    }

    #[test]
    fn days_remaining_clamps_at_zero() {
        let p = ReportingPeriod::new(at(2024, 3, 1), at(2024, 3, 31));
        assert_eq!(p.days_remaining(at(2024, 3, 21)), 10);
        assert_eq!(p.days_remaining(at(2024, 4, 5)), 0);
    }
}
