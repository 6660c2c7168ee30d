//! Entry lifecycle manager: one "save visit" action reconciles the entry,
//! its medications, and its lab requests atomically.
//!
//! Create-vs-update mode is decided by the explicit `existing_entry_id` the
//! editing screen carries, never by a server-side date scan; matching on
//! "today" would merge into another doctor's same-day entry across midnight
//! or timezone boundaries. All writes run inside one SQLite transaction;
//! drafts carry client-generated ids that double as idempotency keys, so a
//! retried save inserts nothing twice.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::access;
use crate::db::{self, DatabaseError, EntryUpdate};
use crate::models::enums::{BookletStatus, EntryType, Frequency, LabPriority, LabStatus};
use crate::models::{LabRequest, MedicalEntry, Medication};

/// A medication being prescribed in the visit form. `draft_id` is minted by
/// the client and becomes the record id, which is what makes re-submission
/// idempotent.
#[derive(Debug, Clone, Deserialize)]
pub struct MedicationDraft {
    pub draft_id: Uuid,
    pub name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    /// Defaults to the visit date.
    pub start_date: Option<NaiveDate>,
    /// Defaults to the entry's follow-up date when one is set, otherwise
    /// the course is open-ended.
    pub end_date: Option<NaiveDate>,
    pub frequency: Frequency,
    pub times_of_day: Option<Vec<String>>,
}

/// A lab request being ordered in the visit form.
#[derive(Debug, Clone, Deserialize)]
pub struct LabDraft {
    pub draft_id: Uuid,
    pub description: String,
    pub priority: Option<LabPriority>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// One user-facing "save visit" action.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveVisitRequest {
    pub booklet_id: Uuid,
    pub doctor_id: String,
    pub visit_date: NaiveDate,
    /// Present when the screen opened in edit mode against this entry.
    pub existing_entry_id: Option<Uuid>,
    /// Partial entry fields; absent fields stay untouched in update mode.
    pub entry: EntryUpdate,
    pub medication_drafts: Vec<MedicationDraft>,
    pub lab_drafts: Vec<LabDraft>,
    /// Drafts withdrawn in this edit session; must belong to the target
    /// entry. Ids that no longer exist are treated as already removed.
    pub deleted_medication_ids: Vec<Uuid>,
    pub deleted_lab_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SaveMode {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveVisitOutcome {
    pub entry_id: Uuid,
    pub mode: SaveMode,
    pub medications_added: u32,
    pub labs_added: u32,
    pub medications_removed: u32,
    pub labs_removed: u32,
}

/// Which step of the save sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SavePhase {
    Validate,
    EntryWrite,
    ChildDelete,
    ChildInsert,
    Commit,
}

impl SavePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validation",
            Self::EntryWrite => "entry write",
            Self::ChildDelete => "child delete",
            Self::ChildInsert => "child insert",
            Self::Commit => "commit",
        }
    }
}

/// Save failure carrying the failed phase and, when the entry write itself
/// went through, the entry id — so the caller can retry just the child step.
#[derive(Error, Debug)]
#[error("visit save failed during {}: {source}", .phase.as_str())]
pub struct SaveVisitError {
    pub phase: SavePhase,
    pub entry_id: Option<Uuid>,
    #[source]
    pub source: DatabaseError,
}

fn fail(phase: SavePhase, entry_id: Option<Uuid>) -> impl FnOnce(DatabaseError) -> SaveVisitError {
    move |source| SaveVisitError {
        phase,
        entry_id,
        source,
    }
}

/// Create or update the visit entry for `request.visit_date` and reconcile
/// its medication and lab children: insert every new draft, remove every
/// withdrawn one, leave everything else alone.
pub fn save_visit(
    conn: &mut Connection,
    request: &SaveVisitRequest,
    now: NaiveDateTime,
) -> Result<SaveVisitOutcome, SaveVisitError> {
    let existing = validate(conn, request).map_err(fail(SavePhase::Validate, None))?;

    // Effective follow-up drives medication end-date inheritance; computable
    // before any write since updates are field-wise.
    let follow_up = request
        .entry
        .follow_up_date
        .or(existing.as_ref().and_then(|e| e.follow_up_date));

    let entry_id = match &existing {
        Some(entry) => entry.id,
        None => Uuid::new_v4(),
    };

    let medications = build_medications(request, entry_id, follow_up)
        .map_err(fail(SavePhase::Validate, None))?;
    let labs = build_labs(request, entry_id);

    let tx = conn
        .transaction()
        .map_err(|e| fail(SavePhase::EntryWrite, None)(e.into()))?;

    let mode = match &existing {
        Some(entry) => {
            db::update_entry(&tx, &entry.id, &request.entry)
                .map_err(fail(SavePhase::EntryWrite, None))?
                .ok_or_else(|| {
                    fail(SavePhase::EntryWrite, None)(DatabaseError::not_found(
                        "medical_entry",
                        entry.id,
                    ))
                })?;
            SaveMode::Updated
        }
        None => {
            let entry = MedicalEntry {
                id: entry_id,
                booklet_id: request.booklet_id,
                doctor_id: request.doctor_id.clone(),
                visit_date: request.visit_date,
                entry_type: request.entry.entry_type.unwrap_or(EntryType::Other),
                notes: request.entry.notes.clone(),
                vitals: request.entry.vitals.clone().unwrap_or_default(),
                diagnosis: request.entry.diagnosis.clone(),
                recommendations: request.entry.recommendations.clone(),
                risk_level: request.entry.risk_level,
                follow_up_date: request.entry.follow_up_date,
                attachments: request.entry.attachments.clone().unwrap_or_default(),
                created_at: now,
            };
            db::insert_entry(&tx, &entry).map_err(fail(SavePhase::EntryWrite, None))?;
            SaveMode::Created
        }
    };

    let mut medications_removed = 0;
    for id in &request.deleted_medication_ids {
        if db::delete_medication(&tx, id)
            .map_err(fail(SavePhase::ChildDelete, Some(entry_id)))?
        {
            medications_removed += 1;
        }
    }
    let mut labs_removed = 0;
    for id in &request.deleted_lab_ids {
        if db::delete_lab_request(&tx, id)
            .map_err(fail(SavePhase::ChildDelete, Some(entry_id)))?
        {
            labs_removed += 1;
        }
    }

    let mut medications_added = 0;
    for medication in &medications {
        if db::insert_medication_if_absent(&tx, medication)
            .map_err(fail(SavePhase::ChildInsert, Some(entry_id)))?
        {
            medications_added += 1;
        }
    }
    let mut labs_added = 0;
    for lab in &labs {
        if db::insert_lab_request_if_absent(&tx, lab)
            .map_err(fail(SavePhase::ChildInsert, Some(entry_id)))?
        {
            labs_added += 1;
        }
    }

    tx.commit()
        .map_err(|e| fail(SavePhase::Commit, Some(entry_id))(e.into()))?;

    tracing::info!(
        entry_id = %entry_id,
        ?mode,
        medications_added,
        labs_added,
        "Saved visit"
    );

    Ok(SaveVisitOutcome {
        entry_id,
        mode,
        medications_added,
        labs_added,
        medications_removed,
        labs_removed,
    })
}

/// All pre-write checks. Returns the target entry in update mode.
fn validate(
    conn: &Connection,
    request: &SaveVisitRequest,
) -> Result<Option<MedicalEntry>, DatabaseError> {
    let booklet = db::get_booklet(conn, &request.booklet_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet", request.booklet_id))?;
    if booklet.status == BookletStatus::Archived {
        return Err(DatabaseError::Conflict {
            entity_type: "booklet".into(),
            id: booklet.id.to_string(),
            reason: "booklet is archived".into(),
        });
    }
    if !access::has_active_access(conn, &request.booklet_id, &request.doctor_id)? {
        return Err(DatabaseError::validation(
            "doctor_id",
            format!(
                "doctor {} has no active access to booklet {}",
                request.doctor_id, request.booklet_id
            ),
        ));
    }

    for draft in &request.medication_drafts {
        if draft.name.trim().is_empty() {
            return Err(DatabaseError::validation("name", "must not be blank"));
        }
        if draft.dosage.trim().is_empty() {
            return Err(DatabaseError::validation("dosage", "must not be blank"));
        }
    }
    for draft in &request.lab_drafts {
        if draft.description.trim().is_empty() {
            return Err(DatabaseError::validation(
                "description",
                "must not be blank",
            ));
        }
    }

    let entry = match request.existing_entry_id {
        Some(entry_id) => {
            let entry = db::get_entry(conn, &entry_id)?
                .ok_or_else(|| DatabaseError::not_found("medical_entry", entry_id))?;
            if entry.booklet_id != request.booklet_id {
                return Err(DatabaseError::validation(
                    "existing_entry_id",
                    "entry belongs to a different booklet",
                ));
            }
            // Only the authoring doctor may rework an entry; other granted
            // doctors record their findings in their own entries.
            if entry.doctor_id != request.doctor_id {
                return Err(DatabaseError::Conflict {
                    entity_type: "medical_entry".into(),
                    id: entry.id.to_string(),
                    reason: format!(
                        "entry was authored by doctor {}, not {}",
                        entry.doctor_id, request.doctor_id
                    ),
                });
            }
            Some(entry)
        }
        None => {
            if request.entry.entry_type.is_none() {
                return Err(DatabaseError::validation(
                    "entry_type",
                    "required when creating an entry",
                ));
            }
            if !request.deleted_medication_ids.is_empty() || !request.deleted_lab_ids.is_empty() {
                return Err(DatabaseError::validation(
                    "deleted_medication_ids",
                    "nothing can be deleted when creating a new entry",
                ));
            }
            None
        }
    };

    if let Some(entry) = &entry {
        // A deleted id still on record must belong to this entry; one that is
        // gone entirely was removed by an earlier attempt of this same save.
        for id in &request.deleted_medication_ids {
            if let Some(medication) = db::get_medication(conn, id)? {
                if medication.entry_id != Some(entry.id) {
                    return Err(DatabaseError::validation(
                        "deleted_medication_ids",
                        format!("medication {id} does not belong to this entry"),
                    ));
                }
            }
        }
        for id in &request.deleted_lab_ids {
            if let Some(lab) = db::get_lab_request(conn, id)? {
                if lab.entry_id != Some(entry.id) {
                    return Err(DatabaseError::validation(
                        "deleted_lab_ids",
                        format!("lab request {id} does not belong to this entry"),
                    ));
                }
                if lab.status != LabStatus::Pending {
                    return Err(DatabaseError::Conflict {
                        entity_type: "lab_request".into(),
                        id: id.to_string(),
                        reason: format!(
                            "a {} request can only be cancelled, not deleted",
                            lab.status.as_str()
                        ),
                    });
                }
            }
        }
    }

    Ok(entry)
}

fn build_medications(
    request: &SaveVisitRequest,
    entry_id: Uuid,
    follow_up: Option<NaiveDate>,
) -> Result<Vec<Medication>, DatabaseError> {
    request
        .medication_drafts
        .iter()
        .map(|draft| {
            let start_date = draft.start_date.unwrap_or(request.visit_date);
            let end_date = draft.end_date.or(follow_up);
            if let Some(end) = end_date {
                if end < start_date {
                    return Err(DatabaseError::validation(
                        "end_date",
                        format!(
                            "end {end} precedes start {start_date} for \"{}\"",
                            draft.name
                        ),
                    ));
                }
            }
            Ok(Medication {
                id: draft.draft_id,
                booklet_id: request.booklet_id,
                entry_id: Some(entry_id),
                name: draft.name.trim().to_owned(),
                dosage: draft.dosage.trim().to_owned(),
                instructions: draft.instructions.clone(),
                start_date,
                end_date,
                frequency: draft.frequency,
                times_of_day: draft.times_of_day.clone(),
                is_active: true,
            })
        })
        .collect()
}

fn build_labs(request: &SaveVisitRequest, entry_id: Uuid) -> Vec<LabRequest> {
    request
        .lab_drafts
        .iter()
        .map(|draft| LabRequest {
            id: draft.draft_id,
            booklet_id: request.booklet_id,
            entry_id: Some(entry_id),
            requested_by: Some(request.doctor_id.clone()),
            description: draft.description.trim().to_owned(),
            status: LabStatus::Pending,
            priority: draft.priority,
            due_date: draft.due_date,
            requested_date: request.visit_date,
            completed_date: None,
            results: None,
            notes: draft.notes.clone(),
            attachments: vec![],
            uploaded_by: None,
        })
        .collect()
}
