use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EntryType, RiskLevel};

/// One clinical visit, pinned to a calendar date. The visit date — not the
/// creation timestamp — is what timeline grouping and the same-day edit
/// rules key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalEntry {
    pub id: Uuid,
    pub booklet_id: Uuid,
    pub doctor_id: String,
    pub visit_date: NaiveDate,
    pub entry_type: EntryType,
    pub notes: Option<String>,
    pub vitals: Vitals,
    pub diagnosis: Option<String>,
    pub recommendations: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub follow_up_date: Option<NaiveDate>,
    pub attachments: Vec<String>,
    pub created_at: NaiveDateTime,
}

/// Structured vitals captured at a visit. All optional; blood pressure is a
/// free-form string ("120/80") per clinical convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vitals {
    pub blood_pressure: Option<String>,
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub heart_rate: Option<i32>,
    pub fetal_heart_rate: Option<i32>,
    pub fundal_height_cm: Option<f64>,
    pub aog: Option<String>,
}
