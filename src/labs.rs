//! Lab request state machine: pending -> completed | cancelled.
//!
//! Both outcomes are terminal; nothing in this crate reopens a request.
//! Completion needs evidence (results text and/or an attachment) and may
//! come from the requesting doctor or from the patient uploading her own
//! copy. Outright deletion exists only for drafts still attached to the
//! entry being edited, through the visit manager.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{DatabaseError, LabUpdate};
use crate::models::enums::LabStatus;
use crate::models::LabRequest;

/// Who is driving a lab transition. Opaque identities, same as everywhere
/// else at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LabActor {
    Doctor(String),
    Patient(String),
}

/// Evidence supplied when completing a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabCompletion {
    pub results: Option<String>,
    pub attachments: Vec<String>,
    /// Defaults to `today` when unset.
    pub completed_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

fn terminal_conflict(lab: &LabRequest, action: &str) -> DatabaseError {
    DatabaseError::Conflict {
        entity_type: "lab_request".into(),
        id: lab.id.to_string(),
        reason: format!("cannot {action} a {} request", lab.status.as_str()),
    }
}

/// `pending -> completed`. Requires non-blank results and/or at least one
/// attachment. A patient actor is recorded as the uploader; the requesting
/// doctor reference is never touched.
pub fn complete(
    lab: &LabRequest,
    completion: &LabCompletion,
    actor: &LabActor,
    today: NaiveDate,
) -> Result<LabUpdate, DatabaseError> {
    if lab.status != LabStatus::Pending {
        return Err(terminal_conflict(lab, "complete"));
    }

    let results = completion
        .results
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if results.is_none() && completion.attachments.is_empty() {
        return Err(DatabaseError::validation(
            "results",
            "completing a lab request requires results text or an attachment",
        ));
    }

    let mut attachments = lab.attachments.clone();
    attachments.extend(completion.attachments.iter().cloned());

    Ok(LabUpdate {
        status: Some(LabStatus::Completed),
        completed_date: Some(completion.completed_date.unwrap_or(today)),
        results: results.map(str::to_owned),
        notes: completion.notes.clone(),
        attachments: Some(attachments),
        uploaded_by: match actor {
            LabActor::Patient(patient_id) => Some(patient_id.clone()),
            LabActor::Doctor(_) => None,
        },
    })
}

/// `pending -> cancelled`. Doctor-only, no evidence required; a patient
/// actor is rejected. The order stays on record as cancelled.
pub fn cancel(lab: &LabRequest, actor: &LabActor) -> Result<LabUpdate, DatabaseError> {
    if let LabActor::Patient(_) = actor {
        return Err(DatabaseError::validation(
            "actor",
            "only a doctor can cancel a lab request",
        ));
    }
    if lab.status != LabStatus::Pending {
        return Err(terminal_conflict(lab, "cancel"));
    }

    Ok(LabUpdate {
        status: Some(LabStatus::Cancelled),
        ..LabUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::LabPriority;
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_lab(status: LabStatus) -> LabRequest {
        LabRequest {
            id: Uuid::new_v4(),
            booklet_id: Uuid::new_v4(),
            entry_id: None,
            requested_by: Some("doctor-1".into()),
            description: "Complete blood count".into(),
            status,
            priority: Some(LabPriority::Routine),
            due_date: None,
            requested_date: date("2025-03-01"),
            completed_date: None,
            results: None,
            notes: None,
            attachments: vec![],
            uploaded_by: None,
        }
    }

    #[test]
    fn complete_with_results_text() {
        let lab = make_lab(LabStatus::Pending);
        let completion = LabCompletion {
            results: Some("Hgb 11.2 g/dL".into()),
            ..LabCompletion::default()
        };
        let actor = LabActor::Doctor("doctor-1".into());
        let update = complete(&lab, &completion, &actor, date("2025-03-10")).unwrap();

        assert_eq!(update.status, Some(LabStatus::Completed));
        assert_eq!(update.completed_date, Some(date("2025-03-10")));
        assert_eq!(update.results.as_deref(), Some("Hgb 11.2 g/dL"));
        assert!(update.uploaded_by.is_none());
    }

    #[test]
    fn complete_with_attachment_only() {
        let lab = make_lab(LabStatus::Pending);
        let completion = LabCompletion {
            attachments: vec!["scan-001".into()],
            completed_date: Some(date("2025-03-08")),
            ..LabCompletion::default()
        };
        let actor = LabActor::Patient("patient-1".into());
        let update = complete(&lab, &completion, &actor, date("2025-03-10")).unwrap();

        assert_eq!(update.completed_date, Some(date("2025-03-08")));
        assert_eq!(update.attachments, Some(vec!["scan-001".to_string()]));
        // Patient-supplied results record the uploader
        assert_eq!(update.uploaded_by.as_deref(), Some("patient-1"));
    }

    #[test]
    fn complete_requires_evidence() {
        let lab = make_lab(LabStatus::Pending);
        let actor = LabActor::Doctor("doctor-1".into());

        let empty = LabCompletion::default();
        assert!(complete(&lab, &empty, &actor, date("2025-03-10")).is_err());

        let blank = LabCompletion {
            results: Some("   ".into()),
            ..LabCompletion::default()
        };
        let err = complete(&lab, &blank, &actor, date("2025-03-10")).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation { .. }));
    }

    #[test]
    fn completion_appends_to_existing_attachments() {
        let mut lab = make_lab(LabStatus::Pending);
        lab.attachments = vec!["req-form".into()];
        let completion = LabCompletion {
            attachments: vec!["result-scan".into()],
            ..LabCompletion::default()
        };
        let actor = LabActor::Doctor("doctor-1".into());
        let update = complete(&lab, &completion, &actor, date("2025-03-10")).unwrap();
        assert_eq!(
            update.attachments,
            Some(vec!["req-form".to_string(), "result-scan".to_string()])
        );
    }

    #[test]
    fn cancel_pending_request() {
        let lab = make_lab(LabStatus::Pending);
        let actor = LabActor::Doctor("doctor-1".into());
        let update = cancel(&lab, &actor).unwrap();
        assert_eq!(update.status, Some(LabStatus::Cancelled));
        assert!(update.completed_date.is_none());
    }

    #[test]
    fn patient_cannot_cancel() {
        let lab = make_lab(LabStatus::Pending);
        let actor = LabActor::Patient("patient-1".into());
        let err = cancel(&lab, &actor).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation { .. }));
    }

    #[test]
    fn terminal_states_stay_terminal() {
        let actor = LabActor::Doctor("doctor-1".into());
        let completion = LabCompletion {
            results: Some("x".into()),
            ..LabCompletion::default()
        };

        for status in [LabStatus::Completed, LabStatus::Cancelled] {
            let lab = make_lab(status);
            let err = complete(&lab, &completion, &actor, date("2025-03-10")).unwrap_err();
            assert!(matches!(err, DatabaseError::Conflict { .. }));
            let err = cancel(&lab, &actor).unwrap_err();
            assert!(matches!(err, DatabaseError::Conflict { .. }));
        }
    }
}
