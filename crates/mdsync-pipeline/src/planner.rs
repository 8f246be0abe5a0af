//! Incremental fetch windows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalPlanner {
    /// Backfill depth for symbols with nothing stored.
    pub default_lookback_days: u32,
}

impl Default for IncrementalPlanner {
    fn default() -> Self {
        Self {
            default_lookback_days: 365,
        }
    }
}

impl IncrementalPlanner {
    pub fn new(default_lookback_days: u32) -> Self {
        Self {
            default_lookback_days,
        }
    }

    /// First date to request.
    ///
    /// Nothing stored: full backfill window. Otherwise the latest stored date
    /// itself; re-fetching it is harmless because writes upsert on
    /// (symbol, date) and it picks up same-day revisions.
    pub fn from_date(&self, latest_stored: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
        match latest_stored {
            Some(latest) => latest,
            None => self.full_window_start(today),
        }
    }

    /// Start of the window used for a forced full refresh.
    pub fn full_window_start(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(i64::from(self.default_lookback_days))
    }

    /// True when stored data already covers the last completed session.
    pub fn is_current(&self, latest_stored: Option<NaiveDate>, today: NaiveDate) -> bool {
        latest_stored.is_some_and(|latest| latest >= last_completed_session(today))
    }
}

/// Most recent weekday strictly before `today`. Exchange holidays are not
/// modelled; a holiday only costs one redundant fetch.
pub fn last_completed_session(today: NaiveDate) -> NaiveDate {
    let mut day = today - Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day -= Duration::days(1);
    }
    day
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_no_stored_date_uses_default_lookback() {
        let planner = IncrementalPlanner::new(365);
        let today = date(2024, 3, 15);
        assert_eq!(planner.from_date(None, today), date(2023, 3, 16));

        // Holds for any lookback and any day.
        for lookback in [1u32, 7, 30, 730] {
            let planner = IncrementalPlanner::new(lookback);
            for offset in 0..40 {
                let today = date(2024, 1, 1) + Duration::days(offset);
                assert_eq!(
                    planner.from_date(None, today),
                    today - Duration::days(i64::from(lookback))
                );
            }
        }
    }

    #[test]
    fn test_stored_date_is_returned_without_buffer() {
        let planner = IncrementalPlanner::default();
        let today = date(2024, 3, 15);
        for offset in 0..400 {
            let stored = today - Duration::days(offset);
            assert_eq!(planner.from_date(Some(stored), today), stored);
        }
    }

    #[test]
    fn test_last_completed_session_skips_weekend() {
        // Monday -> previous Friday.
        assert_eq!(last_completed_session(date(2024, 3, 18)), date(2024, 3, 15));
        // Sunday -> Friday.
        assert_eq!(last_completed_session(date(2024, 3, 17)), date(2024, 3, 15));
        // Wednesday -> Tuesday.
        assert_eq!(last_completed_session(date(2024, 3, 13)), date(2024, 3, 12));
    }

    #[test]
    fn test_is_current() {
        let planner = IncrementalPlanner::default();
        let monday = date(2024, 3, 18);
        assert!(planner.is_current(Some(date(2024, 3, 15)), monday));
        assert!(!planner.is_current(Some(date(2024, 3, 14)), monday));
        assert!(!planner.is_current(None, monday));
    }
}
