use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Frequency, IntakeStatus};

/// One prescribed course, tied to a booklet and usually to the visit entry
/// that prescribed it.
///
/// `is_active` records only the explicit stop action. Whether the course is
/// currently running is a date computation — see
/// [`crate::medications::is_active_on`]; no caller may trust the raw flag
/// alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub booklet_id: Uuid,
    pub entry_id: Option<Uuid>,
    pub name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub start_date: NaiveDate,
    /// Unset = open-ended course.
    pub end_date: Option<NaiveDate>,
    pub frequency: Frequency,
    /// Optional explicit clock times ("08:00"), one per daily dose.
    pub times_of_day: Option<Vec<String>>,
    pub is_active: bool,
}

/// One recorded dose event. At most one log exists per
/// (medication, scheduled date, dose index); re-logging a slot overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationIntakeLog {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_date: NaiveDate,
    /// 0-based slot within the day, bounded by the medication's doses/day.
    pub dose_index: u32,
    pub status: IntakeStatus,
    pub taken_at: Option<NaiveDateTime>,
    pub recorded_by: String,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}
