//! Daily counters owned by the cycle controller.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Cross-cycle mutable state, passed through by value so a test can drive
/// it with any clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    pub last_reset_date: NaiveDate,
    pub interactions_today: u32,
    pub last_interaction: Option<DateTime<Utc>>,
}

impl CycleState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            last_reset_date: today,
            interactions_today: 0,
            last_interaction: None,
        }
    }

    /// Zero the counter when `today` differs from the reference date.
    pub fn rolled_over(self, today: NaiveDate) -> Self {
        if today == self.last_reset_date {
            return self;
        }
        Self {
            last_reset_date: today,
            interactions_today: 0,
            ..self
        }
    }

    pub fn with_interaction(self, at: DateTime<Utc>) -> Self {
        Self {
            interactions_today: self.interactions_today + 1,
            last_interaction: Some(at),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    #[test]
    fn counter_resets_on_new_day() {
        let state = CycleState {
            last_reset_date: date(1),
            interactions_today: 7,
            last_interaction: None,
        };
        let state = state.rolled_over(date(2));
        assert_eq!(state.interactions_today, 0);
        assert_eq!(state.last_reset_date, date(2));

        let at = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap();
        let state = state.with_interaction(at);
        assert_eq!(state.interactions_today, 1);
        assert_eq!(state.last_interaction, Some(at));
    }

    #[test]
    fn same_day_keeps_counter() {
        let state = CycleState {
            last_reset_date: date(1),
            interactions_today: 3,
            last_interaction: None,
        };
        assert_eq!(state.rolled_over(date(1)).interactions_today, 3);
    }
}
