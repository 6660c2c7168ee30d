//! Booklet creation, lifecycle transitions, and doctor access grants.
//!
//! Two invariants live here: a patient has at most one active booklet, and
//! a (booklet, doctor) pair has at most one active grant. Both are checked
//! before writing and violations come back as descriptive conflicts naming
//! the existing record. Nothing in this module deletes history: booklets
//! are archived, grants are revoked.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{self, DatabaseError};
use crate::models::enums::{BookletStatus, RiskLevel};
use crate::models::{Booklet, BookletAccess, HistoricalCondition};
use crate::temporal::due_date_from_lmp;

/// Input for booklet creation, from the doctor's "add patient" workflow or
/// mother self-registration.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooklet {
    pub patient_id: String,
    pub label: String,
    pub lmp_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub risk_level: Option<RiskLevel>,
    pub notes: Option<String>,
    pub allergies: Vec<String>,
    pub conditions: Vec<HistoricalCondition>,
}

/// Create a booklet, rejecting a second active one for the same patient.
/// A due date is derived from the LMP via Naegele's rule when only the LMP
/// is given.
pub fn create_booklet(
    conn: &Connection,
    new: &NewBooklet,
    now: NaiveDateTime,
) -> Result<Booklet, DatabaseError> {
    let label = new.label.trim();
    if label.is_empty() {
        return Err(DatabaseError::validation("label", "must not be blank"));
    }
    if new.patient_id.trim().is_empty() {
        return Err(DatabaseError::validation("patient_id", "must not be blank"));
    }

    if let Some(existing) = db::find_active_booklet(conn, &new.patient_id)? {
        return Err(DatabaseError::Conflict {
            entity_type: "booklet".into(),
            id: existing.id.to_string(),
            reason: format!(
                "patient {} already has an active booklet \"{}\"",
                new.patient_id, existing.label
            ),
        });
    }

    let booklet = Booklet {
        id: Uuid::new_v4(),
        patient_id: new.patient_id.clone(),
        label: label.to_owned(),
        status: BookletStatus::Active,
        lmp_date: new.lmp_date,
        due_date: new.due_date.or_else(|| new.lmp_date.map(due_date_from_lmp)),
        delivery_date: None,
        risk_level: new.risk_level,
        notes: new.notes.clone(),
        allergies: new.allergies.clone(),
        conditions: new.conditions.clone(),
        created_at: now,
    };
    db::insert_booklet(conn, &booklet)?;
    tracing::info!(booklet_id = %booklet.id, "Created booklet");
    Ok(booklet)
}

fn require_active_booklet(conn: &Connection, id: &Uuid) -> Result<Booklet, DatabaseError> {
    let booklet =
        db::get_booklet(conn, id)?.ok_or_else(|| DatabaseError::not_found("booklet", id))?;
    if booklet.status != BookletStatus::Active {
        return Err(DatabaseError::Conflict {
            entity_type: "booklet".into(),
            id: booklet.id.to_string(),
            reason: format!("booklet is {}, not active", booklet.status.as_str()),
        });
    }
    Ok(booklet)
}

/// `active -> completed`, recording the actual delivery date.
pub fn complete_booklet(
    conn: &Connection,
    id: &Uuid,
    delivery_date: NaiveDate,
) -> Result<Booklet, DatabaseError> {
    require_active_booklet(conn, id)?;
    db::set_booklet_status(conn, id, BookletStatus::Completed, Some(delivery_date))?
        .ok_or_else(|| DatabaseError::not_found("booklet", id))
}

/// `active -> archived`. The record and its access history stay readable.
pub fn archive_booklet(conn: &Connection, id: &Uuid) -> Result<Booklet, DatabaseError> {
    require_active_booklet(conn, id)?;
    db::set_booklet_status(conn, id, BookletStatus::Archived, None)?
        .ok_or_else(|| DatabaseError::not_found("booklet", id))
}

/// Grant a doctor access to a booklet. Re-granting after revocation creates
/// a fresh record; granting over a live grant is a conflict naming it.
pub fn grant_access(
    conn: &Connection,
    booklet_id: &Uuid,
    doctor_id: &str,
    now: NaiveDateTime,
) -> Result<BookletAccess, DatabaseError> {
    if doctor_id.trim().is_empty() {
        return Err(DatabaseError::validation("doctor_id", "must not be blank"));
    }
    db::get_booklet(conn, booklet_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet", booklet_id))?;

    if let Some(existing) = db::find_active_access(conn, booklet_id, doctor_id)? {
        return Err(DatabaseError::Conflict {
            entity_type: "booklet_access".into(),
            id: existing.id.to_string(),
            reason: format!("doctor {doctor_id} already has access to this booklet"),
        });
    }

    let access = BookletAccess {
        id: Uuid::new_v4(),
        booklet_id: *booklet_id,
        doctor_id: doctor_id.to_owned(),
        granted_at: now,
        revoked_at: None,
        patient_label: None,
    };
    db::insert_access(conn, &access)?;
    tracing::info!(booklet_id = %booklet_id, doctor_id, "Granted booklet access");
    Ok(access)
}

/// Revoke the active grant for this (booklet, doctor) pair. The record is
/// stamped, never deleted, so audit history survives.
pub fn revoke_access(
    conn: &Connection,
    booklet_id: &Uuid,
    doctor_id: &str,
    now: NaiveDateTime,
) -> Result<BookletAccess, DatabaseError> {
    let access = db::find_active_access(conn, booklet_id, doctor_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet_access", booklet_id))?;

    db::mark_access_revoked(conn, &access.id, now)?
        .ok_or_else(|| DatabaseError::not_found("booklet_access", access.id))
}

/// Set or clear the doctor's own label for this patient. Cosmetic only,
/// scoped to the doctor's list; `None` clears it.
pub fn set_patient_label(
    conn: &Connection,
    booklet_id: &Uuid,
    doctor_id: &str,
    label: Option<&str>,
) -> Result<BookletAccess, DatabaseError> {
    let trimmed = match label {
        Some(l) => {
            let t = l.trim();
            if t.is_empty() {
                return Err(DatabaseError::validation(
                    "patient_label",
                    "must not be blank; pass no label to clear it",
                ));
            }
            Some(t)
        }
        None => None,
    };

    let access = db::find_active_access(conn, booklet_id, doctor_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet_access", booklet_id))?;

    db::set_access_patient_label(conn, &access.id, trimmed)?
        .ok_or_else(|| DatabaseError::not_found("booklet_access", access.id))
}

/// Whether the doctor currently holds a live grant. The visit manager calls
/// this before any write.
pub fn has_active_access(
    conn: &Connection,
    booklet_id: &Uuid,
    doctor_id: &str,
) -> Result<bool, DatabaseError> {
    Ok(db::find_active_access(conn, booklet_id, doctor_id)?.is_some())
}
