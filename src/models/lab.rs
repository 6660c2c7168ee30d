use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{LabPriority, LabStatus};

/// One ordered laboratory test. Results may be supplied by the requesting
/// doctor or uploaded by the patient herself (`uploaded_by` set in that
/// case); completed and cancelled are terminal states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabRequest {
    pub id: Uuid,
    pub booklet_id: Uuid,
    pub entry_id: Option<Uuid>,
    pub requested_by: Option<String>,
    pub description: String,
    pub status: LabStatus,
    pub priority: Option<LabPriority>,
    pub due_date: Option<NaiveDate>,
    pub requested_date: NaiveDate,
    pub completed_date: Option<NaiveDate>,
    pub results: Option<String>,
    pub notes: Option<String>,
    /// Opaque attachment references; blob storage lives outside this crate.
    pub attachments: Vec<String>,
    pub uploaded_by: Option<String>,
}
