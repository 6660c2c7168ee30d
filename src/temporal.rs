//! Calendar-day utilities: day keys, gestational age, day counts.
//!
//! Everything here is a pure function over `chrono` naive types. Boundary
//! conversion from absolute instants to the patient's local calendar day is
//! the adapter's job; these functions never consult the wall clock.

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Naegele's rule: expected delivery 280 days after the last menstrual period.
pub const GESTATION_DAYS: i64 = 280;

/// Normalizes a timestamp to its calendar-day key. All grouping and same-day
/// comparisons in this crate go through this, never through raw timestamps.
pub fn date_key(ts: NaiveDateTime) -> NaiveDate {
    ts.date()
}

pub fn due_date_from_lmp(lmp: NaiveDate) -> NaiveDate {
    lmp + Duration::days(GESTATION_DAYS)
}

/// Gestational age as a weeks + days composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestationalAge {
    pub weeks: u32,
    pub days: u32,
}

impl GestationalAge {
    pub fn total_days(&self) -> u32 {
        self.weeks * 7 + self.days
    }
}

impl fmt::Display for GestationalAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weeks_unit = if self.weeks == 1 { "week" } else { "weeks" };
        let days_unit = if self.days == 1 { "day" } else { "days" };
        write!(
            f,
            "{} {weeks_unit} {} {days_unit}",
            self.weeks, self.days
        )
    }
}

/// Gestational age at `visit`, counting back from the expected due date.
///
/// Post-term visits keep counting past 40 weeks with no ceiling; a visit
/// before the implied conception window returns `None` instead of a
/// negative age.
pub fn aog_from_due_date(due: NaiveDate, visit: NaiveDate) -> Option<GestationalAge> {
    let days = GESTATION_DAYS - (due - visit).num_days();
    if days < 0 {
        return None;
    }
    Some(GestationalAge {
        weeks: (days / 7) as u32,
        days: (days % 7) as u32,
    })
}

/// Gestational age at `visit` counting forward from the last menstrual period.
pub fn aog_from_lmp(lmp: NaiveDate, visit: NaiveDate) -> Option<GestationalAge> {
    aog_from_due_date(due_date_from_lmp(lmp), visit)
}

/// Whole days from `today` until `target`. Negative means the target has
/// passed, so callers can render overdue styling rather than catch an error.
pub fn days_remaining(target: NaiveDate, today: NaiveDate) -> i64 {
    (target - today).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn date_key_strips_time_of_day() {
        let late = date("2025-03-10").and_hms_opt(23, 59, 59).unwrap();
        let early = date("2025-03-10").and_hms_opt(0, 0, 1).unwrap();
        assert_eq!(date_key(late), date_key(early));
        assert_eq!(date_key(late), date("2025-03-10"));
    }

    #[test]
    fn naegele_rule_from_lmp() {
        // LMP 2024-01-01 -> due 280 days later
        assert_eq!(due_date_from_lmp(date("2024-01-01")), date("2024-10-07"));
    }

    #[test]
    fn aog_13_weeks_at_91_days() {
        let aog = aog_from_lmp(date("2024-01-01"), date("2024-04-01")).unwrap();
        assert_eq!(aog, GestationalAge { weeks: 13, days: 0 });
        assert_eq!(aog.to_string(), "13 weeks 0 days");
    }

    #[test]
    fn aog_counts_past_due_date() {
        // 10 days post-term: 41 weeks 3 days, no clamping at 40 weeks
        let aog = aog_from_due_date(date("2024-10-07"), date("2024-10-17")).unwrap();
        assert_eq!(aog, GestationalAge { weeks: 41, days: 3 });
    }

    #[test]
    fn aog_before_conception_is_none() {
        assert!(aog_from_lmp(date("2024-06-01"), date("2024-05-20")).is_none());
        assert!(aog_from_due_date(date("2024-10-07"), date("2023-12-25")).is_none());
    }

    #[test]
    fn aog_zero_on_lmp_day() {
        let aog = aog_from_lmp(date("2024-01-01"), date("2024-01-01")).unwrap();
        assert_eq!(aog.total_days(), 0);
        assert_eq!(aog.to_string(), "0 weeks 0 days");
    }

    #[test]
    fn singular_units_display() {
        let aog = GestationalAge { weeks: 1, days: 1 };
        assert_eq!(aog.to_string(), "1 week 1 day");
    }

    #[test]
    fn days_remaining_signed() {
        let today = date("2025-03-10");
        assert_eq!(days_remaining(date("2025-03-15"), today), 5);
        assert_eq!(days_remaining(today, today), 0);
        // Overdue target yields a negative count, not an error
        assert_eq!(days_remaining(date("2025-03-01"), today), -9);
    }
}
