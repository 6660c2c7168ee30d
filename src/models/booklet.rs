use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BookletStatus, RiskLevel};

/// One pregnancy record for one patient. Patient and doctor references are
/// opaque caller-supplied identifiers; only booklet-family records carry
/// UUIDs minted by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booklet {
    pub id: Uuid,
    pub patient_id: String,
    pub label: String,
    pub status: BookletStatus,
    pub lmp_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub risk_level: Option<RiskLevel>,
    pub notes: Option<String>,
    pub allergies: Vec<String>,
    pub conditions: Vec<HistoricalCondition>,
    pub created_at: NaiveDateTime,
}

/// Past diagnosis or condition carried on the booklet cover page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalCondition {
    pub name: String,
    pub year: Option<i32>,
    pub notes: Option<String>,
}

/// Grants one doctor visibility into one booklet. Revocation stamps
/// `revoked_at` rather than deleting, so the grant history stays auditable;
/// a re-grant is a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookletAccess {
    pub id: Uuid,
    pub booklet_id: Uuid,
    pub doctor_id: String,
    pub granted_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    /// Doctor-chosen label for this patient, scoped to that doctor's own
    /// list. Never a system key.
    pub patient_label: Option<String>,
}

impl BookletAccess {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
