use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::models::enums::{BookletStatus, RiskLevel};
use crate::models::{LabRequest, MedicalEntry};
use crate::temporal::GestationalAge;

/// Items sharing one calendar day, insertion order preserved.
#[derive(Debug, Clone, Serialize)]
pub struct DayGroup<T> {
    pub date: NaiveDate,
    pub items: Vec<T>,
}

/// One day on a booklet's timeline: the visit entries recorded that day and
/// the labs requested that day.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineDay {
    pub date: NaiveDate,
    pub entries: Vec<MedicalEntry>,
    pub labs: Vec<LabRequest>,
}

/// Full chronological view, newest day first.
#[derive(Debug, Clone, Serialize)]
pub struct BookletTimeline {
    pub days: Vec<TimelineDay>,
    /// Most recent day, preselected on first load; user navigation takes
    /// over from there.
    pub default_selected_date: Option<NaiveDate>,
}

/// Derived counts for list and header views. Recomputed on every read,
/// never persisted, so they cannot go stale.
#[derive(Debug, Clone, Serialize)]
pub struct BookletSummary {
    pub booklet_id: Uuid,
    pub label: String,
    pub status: BookletStatus,
    pub risk_level: Option<RiskLevel>,
    pub active_medication_count: u32,
    pub pending_lab_count: u32,
    pub has_allergies: bool,
    pub last_visit_date: Option<NaiveDate>,
    pub next_appointment: Option<NaiveDate>,
    pub current_aog: Option<GestationalAge>,
}
