//! Medication window engine: active-window checks, adherence, extend/stop.
//!
//! The stored `is_active` flag only records an explicit stop action; whether
//! a course is running on a given day is always the date computation in
//! [`is_active_on`]. Every read site recomputes it, so the mother's and the
//! doctor's views of the same medication can never disagree.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{DatabaseError, MedicationUpdate};
use crate::models::enums::{Frequency, IntakeStatus};
use crate::models::{Medication, MedicationIntakeLog};
use crate::temporal::days_remaining;

/// Trailing window used by adherence displays unless a caller asks otherwise.
pub const DEFAULT_ADHERENCE_WINDOW_DAYS: u32 = 7;

/// Whether the medication is prescribed-and-running on `date`.
///
/// Pure and deterministic: `is_active` must be set, the date must be on or
/// after the start, and on or before the end when one exists. A medication
/// with `is_active = true` and a past end date is expired, and this is the
/// only function allowed to make that call.
pub fn is_active_on(medication: &Medication, date: NaiveDate) -> bool {
    medication.is_active
        && medication.start_date <= date
        && medication.end_date.map_or(true, |end| end >= date)
}

/// Read-side projection of a medication. Exposes the computed status for a
/// reference day instead of the raw stored flag, so list and detail screens
/// cannot accidentally trust `is_active` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationView {
    pub id: Uuid,
    pub entry_id: Option<Uuid>,
    pub name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub frequency: Frequency,
    pub times_of_day: Option<Vec<String>>,
    /// Computed for the projection day via [`is_active_on`].
    pub active: bool,
    /// Signed days until the end date; negative = already ended. `None` for
    /// open-ended courses.
    pub days_remaining: Option<i64>,
}

impl MedicationView {
    pub fn project(medication: &Medication, today: NaiveDate) -> Self {
        Self {
            id: medication.id,
            entry_id: medication.entry_id,
            name: medication.name.clone(),
            dosage: medication.dosage.clone(),
            instructions: medication.instructions.clone(),
            start_date: medication.start_date,
            end_date: medication.end_date,
            frequency: medication.frequency,
            times_of_day: medication.times_of_day.clone(),
            active: is_active_on(medication, today),
            days_remaining: medication
                .end_date
                .map(|end| days_remaining(end, today)),
        }
    }
}

/// Fraction of expected doses logged as taken over the trailing
/// `window_days` ending at `today`, in `[0, 1]`.
///
/// The denominator counts only days the course has actually been running:
/// a medication started 4 days ago inside a 7-day window owes
/// `4 * doses_per_day` doses, not 7 days' worth. Zero expected doses yields
/// 0.0 (callers suppress the display), never NaN. Skipped and missed logs
/// count against the rate only by not being taken; they do not shrink the
/// expectation.
pub fn compute_adherence(
    medication: &Medication,
    logs: &[MedicationIntakeLog],
    window_days: u32,
    today: NaiveDate,
) -> f64 {
    let elapsed = (today - medication.start_date).num_days();
    let active_days = elapsed.clamp(0, window_days as i64);
    let expected = active_days as u32 * medication.frequency.doses_per_day();
    if expected == 0 {
        return 0.0;
    }

    let window_floor = today - Duration::days(window_days as i64);
    let taken = logs
        .iter()
        .filter(|log| {
            log.medication_id == medication.id
                && log.status == IntakeStatus::Taken
                && log.scheduled_date >= medication.start_date
                && log.scheduled_date > window_floor
                && log.scheduled_date <= today
        })
        .count();

    (taken as f64 / expected as f64).min(1.0)
}

/// Push the end date forward. The new end must land strictly after the
/// current effective end (today, or the stored end date when further out)
/// and after the start date; anything else is a validation error, never a
/// silent clamp. Returns the update to apply, mutates nothing.
pub fn extend(
    medication: &Medication,
    new_end: NaiveDate,
    today: NaiveDate,
) -> Result<MedicationUpdate, DatabaseError> {
    let effective_end = medication.end_date.map_or(today, |end| end.max(today));
    if new_end <= effective_end {
        return Err(DatabaseError::validation(
            "end_date",
            format!("extension to {new_end} must be after {effective_end}"),
        ));
    }
    if new_end <= medication.start_date {
        return Err(DatabaseError::validation(
            "end_date",
            format!(
                "extension to {new_end} precedes start date {}",
                medication.start_date
            ),
        ));
    }

    Ok(MedicationUpdate {
        end_date: Some(new_end),
        is_active: None,
    })
}

/// Stop the course as of `effective` (usually today). Idempotent: stopping
/// an already-stopped medication keeps the original end date so re-issuing
/// the action on a stale screen is harmless.
pub fn stop(medication: &Medication, effective: NaiveDate) -> MedicationUpdate {
    if !medication.is_active && medication.end_date.is_some() {
        return MedicationUpdate {
            end_date: None,
            is_active: Some(false),
        };
    }

    MedicationUpdate {
        end_date: Some(effective),
        is_active: Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::Frequency;
    use chrono::NaiveDateTime;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_medication(start: &str, end: Option<&str>, is_active: bool) -> Medication {
        Medication {
            id: Uuid::new_v4(),
            booklet_id: Uuid::new_v4(),
            entry_id: None,
            name: "ferrous sulfate".into(),
            dosage: "60 mg".into(),
            instructions: None,
            start_date: date(start),
            end_date: end.map(date),
            frequency: Frequency::TwiceDaily,
            times_of_day: None,
            is_active,
        }
    }

    fn taken_log(medication: &Medication, day: &str) -> MedicationIntakeLog {
        log_with_status(medication, day, 0, IntakeStatus::Taken)
    }

    fn log_with_status(
        medication: &Medication,
        day: &str,
        dose_index: u32,
        status: IntakeStatus,
    ) -> MedicationIntakeLog {
        MedicationIntakeLog {
            id: Uuid::new_v4(),
            medication_id: medication.id,
            scheduled_date: date(day),
            dose_index,
            status,
            taken_at: None,
            recorded_by: "patient-1".into(),
            notes: None,
            created_at: NaiveDateTime::parse_from_str(
                "2025-03-10 08:00:00",
                "%Y-%m-%d %H:%M:%S",
            )
            .unwrap(),
        }
    }

    // ───────────────────────────────────────
    // active window
    // ───────────────────────────────────────

    #[test]
    fn active_within_window_only() {
        let medication = make_medication("2025-01-01", Some("2025-01-10"), true);
        assert!(is_active_on(&medication, date("2025-01-05")));
        assert!(is_active_on(&medication, date("2025-01-01")));
        assert!(is_active_on(&medication, date("2025-01-10")));
        assert!(!is_active_on(&medication, date("2025-01-15")));
        assert!(!is_active_on(&medication, date("2024-12-31")));
    }

    #[test]
    fn expired_course_inactive_despite_raw_flag() {
        let medication = make_medication("2025-01-01", Some("2025-01-10"), true);
        assert!(medication.is_active);
        assert!(!is_active_on(&medication, date("2025-02-01")));
    }

    #[test]
    fn stopped_flag_wins_over_date_range() {
        let medication = make_medication("2025-01-01", None, false);
        assert!(!is_active_on(&medication, date("2025-01-05")));
    }

    #[test]
    fn open_ended_course_stays_active() {
        let medication = make_medication("2025-01-01", None, true);
        assert!(is_active_on(&medication, date("2030-01-01")));
    }

    #[test]
    fn view_exposes_computed_status() {
        let medication = make_medication("2025-01-01", Some("2025-01-10"), true);
        let view = MedicationView::project(&medication, date("2025-02-01"));
        assert!(!view.active);
        assert_eq!(view.days_remaining, Some(-22));

        let view = MedicationView::project(&medication, date("2025-01-05"));
        assert!(view.active);
        assert_eq!(view.days_remaining, Some(5));
    }

    // ───────────────────────────────────────
    // adherence
    // ───────────────────────────────────────

    #[test]
    fn adherence_counts_only_elapsed_active_days() {
        // frequency 2/day, 7-day window, started 4 days ago, 5 taken logs:
        // expected = 2 * 4 = 8, adherence = 5/8
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-06", None, true);
        let logs = vec![
            taken_log(&medication, "2025-03-06"),
            log_with_status(&medication, "2025-03-06", 1, IntakeStatus::Taken),
            taken_log(&medication, "2025-03-07"),
            taken_log(&medication, "2025-03-08"),
            taken_log(&medication, "2025-03-09"),
        ];
        let rate = compute_adherence(&medication, &logs, 7, today);
        assert!((rate - 0.625).abs() < 1e-9);
    }

    #[test]
    fn adherence_zero_expected_is_zero_not_nan() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-10", None, true); // started today
        let rate = compute_adherence(&medication, &[], 7, today);
        assert_eq!(rate, 0.0);

        let future = make_medication("2025-04-01", None, true);
        assert_eq!(compute_adherence(&future, &[], 7, today), 0.0);
    }

    #[test]
    fn adherence_capped_at_one() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-09", None, true);
        // Expected = 2; log more than that (extra slots, e.g. as-needed extras)
        let logs = vec![
            taken_log(&medication, "2025-03-09"),
            log_with_status(&medication, "2025-03-09", 1, IntakeStatus::Taken),
            taken_log(&medication, "2025-03-10"),
            log_with_status(&medication, "2025-03-10", 1, IntakeStatus::Taken),
        ];
        let rate = compute_adherence(&medication, &logs, 7, today);
        assert_eq!(rate, 1.0);
    }

    #[test]
    fn skipped_and_missed_do_not_count_as_taken() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-08", None, true);
        // 2 elapsed days * 2/day = 4 expected, 1 taken
        let logs = vec![
            taken_log(&medication, "2025-03-08"),
            log_with_status(&medication, "2025-03-08", 1, IntakeStatus::Skipped),
            log_with_status(&medication, "2025-03-09", 0, IntakeStatus::Missed),
        ];
        let rate = compute_adherence(&medication, &logs, 7, today);
        assert!((rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn adherence_ignores_logs_outside_window() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-01-01", None, true);
        let logs = vec![
            taken_log(&medication, "2025-01-05"), // long before the window
            taken_log(&medication, "2025-03-09"),
        ];
        // 7 active days in window, 14 expected, 1 counted
        let rate = compute_adherence(&medication, &logs, 7, today);
        assert!((rate - 1.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn adherence_ignores_other_medications_logs() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-09", None, true);
        let other = make_medication("2025-03-09", None, true);
        let logs = vec![taken_log(&other, "2025-03-09")];
        assert_eq!(compute_adherence(&medication, &logs, 7, today), 0.0);
    }

    #[test]
    fn adherence_always_within_bounds() {
        let today = date("2025-03-10");
        for (start, log_days) in [
            ("2025-03-01", vec!["2025-03-08", "2025-03-09", "2025-03-10"]),
            ("2025-03-10", vec![]),
            ("2024-01-01", vec!["2025-03-10"]),
        ] {
            let medication = make_medication(start, None, true);
            let logs: Vec<_> = log_days
                .iter()
                .map(|d| taken_log(&medication, d))
                .collect();
            let rate = compute_adherence(&medication, &logs, 7, today);
            assert!((0.0..=1.0).contains(&rate), "rate {rate} out of bounds");
        }
    }

    // ───────────────────────────────────────
    // extend / stop
    // ───────────────────────────────────────

    #[test]
    fn extend_past_current_end() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-01", Some("2025-03-15"), true);
        let update = extend(&medication, date("2025-03-22"), today).unwrap();
        assert_eq!(update.end_date, Some(date("2025-03-22")));
        assert_eq!(update.is_active, None);
    }

    #[test]
    fn extend_rejects_dates_not_after_effective_end() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-01", Some("2025-03-15"), true);
        // Not after the stored end
        assert!(extend(&medication, date("2025-03-15"), today).is_err());
        // Open-ended course: must still be after today
        let open = make_medication("2025-03-01", None, true);
        assert!(extend(&open, today, today).is_err());
        assert!(extend(&open, date("2025-03-11"), today).is_ok());
    }

    #[test]
    fn extend_rejects_end_before_start() {
        let today = date("2025-02-01");
        let medication = make_medication("2025-03-01", None, true);
        let err = extend(&medication, date("2025-02-10"), today).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation { .. }));
    }

    #[test]
    fn stop_ends_course_today() {
        let today = date("2025-03-10");
        let medication = make_medication("2025-03-01", None, true);
        let update = stop(&medication, today);
        assert_eq!(update.end_date, Some(today));
        assert_eq!(update.is_active, Some(false));

        // Applying the update: inactive immediately
        let stopped = Medication {
            end_date: update.end_date,
            is_active: false,
            ..medication
        };
        assert!(!is_active_on(&stopped, today));
    }

    #[test]
    fn stop_is_idempotent_and_keeps_original_end() {
        let medication = make_medication("2025-03-01", Some("2025-03-05"), false);
        let update = stop(&medication, date("2025-03-10"));
        assert_eq!(update.end_date, None);
        assert_eq!(update.is_active, Some(false));
    }
}
