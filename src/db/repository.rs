//! CRUD and list-by-foreign-key queries for every booklet entity.
//!
//! Point lookups return `Ok(None)` for missing rows so callers can tell
//! "not found" apart from an empty list. Partial updates take an update
//! struct whose `None` fields leave columns untouched and return the
//! resulting record, or `None` when the target row no longer exists.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, Row};
use serde::Deserialize;
use uuid::Uuid;

use super::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_READ_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_WRITE_FMT: &str = "%Y-%m-%d %H:%M:%S";

// ═══════════════════════════════════════════
// Field codecs
// ═══════════════════════════════════════════

fn parse_uuid(field: &str, s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|_| DatabaseError::validation(field, format!("malformed id {s:?}")))
}

fn parse_uuid_opt(field: &str, s: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    s.map(|s| parse_uuid(field, &s)).transpose()
}

fn parse_date(field: &str, s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|_| DatabaseError::validation(field, format!("malformed date {s:?}")))
}

fn parse_date_opt(field: &str, s: Option<String>) -> Result<Option<NaiveDate>, DatabaseError> {
    s.map(|s| parse_date(field, &s)).transpose()
}

fn parse_datetime(field: &str, s: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(s, DATETIME_READ_FMT)
        .map_err(|_| DatabaseError::validation(field, format!("malformed timestamp {s:?}")))
}

fn parse_datetime_opt(
    field: &str,
    s: Option<String>,
) -> Result<Option<NaiveDateTime>, DatabaseError> {
    s.map(|s| parse_datetime(field, &s)).transpose()
}

fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

fn fmt_datetime(ts: &NaiveDateTime) -> String {
    ts.format(DATETIME_WRITE_FMT).to_string()
}

fn from_json<T: serde::de::DeserializeOwned>(field: &str, s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s)
        .map_err(|e| DatabaseError::validation(field, format!("malformed JSON: {e}")))
}

fn to_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::validation(field, format!("unserializable value: {e}")))
}

// ═══════════════════════════════════════════
// Booklets
// ═══════════════════════════════════════════

const BOOKLET_COLS: &str = "id, patient_id, label, status, lmp_date, due_date, delivery_date,
     risk_level, notes, allergies, conditions, created_at";

struct BookletRow {
    id: String,
    patient_id: String,
    label: String,
    status: String,
    lmp_date: Option<String>,
    due_date: Option<String>,
    delivery_date: Option<String>,
    risk_level: Option<String>,
    notes: Option<String>,
    allergies: String,
    conditions: String,
    created_at: String,
}

fn map_booklet_row(row: &Row) -> rusqlite::Result<BookletRow> {
    Ok(BookletRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        label: row.get(2)?,
        status: row.get(3)?,
        lmp_date: row.get(4)?,
        due_date: row.get(5)?,
        delivery_date: row.get(6)?,
        risk_level: row.get(7)?,
        notes: row.get(8)?,
        allergies: row.get(9)?,
        conditions: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn booklet_from_row(row: BookletRow) -> Result<Booklet, DatabaseError> {
    Ok(Booklet {
        id: parse_uuid("booklet.id", &row.id)?,
        patient_id: row.patient_id,
        label: row.label,
        status: BookletStatus::from_str(&row.status)?,
        lmp_date: parse_date_opt("booklet.lmp_date", row.lmp_date)?,
        due_date: parse_date_opt("booklet.due_date", row.due_date)?,
        delivery_date: parse_date_opt("booklet.delivery_date", row.delivery_date)?,
        risk_level: row
            .risk_level
            .as_deref()
            .map(RiskLevel::from_str)
            .transpose()?,
        notes: row.notes,
        allergies: from_json("booklet.allergies", &row.allergies)?,
        conditions: from_json("booklet.conditions", &row.conditions)?,
        created_at: parse_datetime("booklet.created_at", &row.created_at)?,
    })
}

pub fn insert_booklet(conn: &Connection, booklet: &Booklet) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO booklets (id, patient_id, label, status, lmp_date, due_date, delivery_date,
         risk_level, notes, allergies, conditions, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            booklet.id.to_string(),
            booklet.patient_id,
            booklet.label,
            booklet.status.as_str(),
            booklet.lmp_date.as_ref().map(fmt_date),
            booklet.due_date.as_ref().map(fmt_date),
            booklet.delivery_date.as_ref().map(fmt_date),
            booklet.risk_level.as_ref().map(|r| r.as_str()),
            booklet.notes,
            to_json("booklet.allergies", &booklet.allergies)?,
            to_json("booklet.conditions", &booklet.conditions)?,
            fmt_datetime(&booklet.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_booklet(conn: &Connection, id: &Uuid) -> Result<Option<Booklet>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {BOOKLET_COLS} FROM booklets WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], map_booklet_row);

    match result {
        Ok(row) => Ok(Some(booklet_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The booklet with status = active for this patient, if any. The creation
/// layer uses this to enforce the one-active-booklet invariant.
pub fn find_active_booklet(
    conn: &Connection,
    patient_id: &str,
) -> Result<Option<Booklet>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKLET_COLS} FROM booklets WHERE patient_id = ?1 AND status = 'active' LIMIT 1"
    ))?;
    let result = stmt.query_row(params![patient_id], map_booklet_row);

    match result {
        Ok(row) => Ok(Some(booklet_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_booklets_by_patient(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<Booklet>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKLET_COLS} FROM booklets WHERE patient_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id], map_booklet_row)?;

    rows.map(|r| booklet_from_row(r?)).collect()
}

/// Status transition write. Returns the updated record, `None` when the
/// booklet no longer exists.
pub fn set_booklet_status(
    conn: &Connection,
    id: &Uuid,
    status: BookletStatus,
    delivery_date: Option<NaiveDate>,
) -> Result<Option<Booklet>, DatabaseError> {
    let changed = match delivery_date {
        Some(date) => conn.execute(
            "UPDATE booklets SET status = ?1, delivery_date = ?2 WHERE id = ?3",
            params![status.as_str(), fmt_date(&date), id.to_string()],
        )?,
        None => conn.execute(
            "UPDATE booklets SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?,
    };

    if changed == 0 {
        return Ok(None);
    }
    get_booklet(conn, id)
}

// ═══════════════════════════════════════════
// Access grants
// ═══════════════════════════════════════════

const ACCESS_COLS: &str = "id, booklet_id, doctor_id, granted_at, revoked_at, patient_label";

struct AccessRow {
    id: String,
    booklet_id: String,
    doctor_id: String,
    granted_at: String,
    revoked_at: Option<String>,
    patient_label: Option<String>,
}

fn map_access_row(row: &Row) -> rusqlite::Result<AccessRow> {
    Ok(AccessRow {
        id: row.get(0)?,
        booklet_id: row.get(1)?,
        doctor_id: row.get(2)?,
        granted_at: row.get(3)?,
        revoked_at: row.get(4)?,
        patient_label: row.get(5)?,
    })
}

fn access_from_row(row: AccessRow) -> Result<BookletAccess, DatabaseError> {
    Ok(BookletAccess {
        id: parse_uuid("access.id", &row.id)?,
        booklet_id: parse_uuid("access.booklet_id", &row.booklet_id)?,
        doctor_id: row.doctor_id,
        granted_at: parse_datetime("access.granted_at", &row.granted_at)?,
        revoked_at: parse_datetime_opt("access.revoked_at", row.revoked_at)?,
        patient_label: row.patient_label,
    })
}

pub fn insert_access(conn: &Connection, access: &BookletAccess) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO booklet_access (id, booklet_id, doctor_id, granted_at, revoked_at, patient_label)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            access.id.to_string(),
            access.booklet_id.to_string(),
            access.doctor_id,
            fmt_datetime(&access.granted_at),
            access.revoked_at.as_ref().map(fmt_datetime),
            access.patient_label,
        ],
    )?;
    Ok(())
}

pub fn get_access(conn: &Connection, id: &Uuid) -> Result<Option<BookletAccess>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {ACCESS_COLS} FROM booklet_access WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], map_access_row);

    match result {
        Ok(row) => Ok(Some(access_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The one non-revoked grant for this (booklet, doctor) pair, if any.
pub fn find_active_access(
    conn: &Connection,
    booklet_id: &Uuid,
    doctor_id: &str,
) -> Result<Option<BookletAccess>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCESS_COLS} FROM booklet_access
         WHERE booklet_id = ?1 AND doctor_id = ?2 AND revoked_at IS NULL LIMIT 1"
    ))?;
    let result = stmt.query_row(params![booklet_id.to_string(), doctor_id], map_access_row);

    match result {
        Ok(row) => Ok(Some(access_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Full grant history for a booklet, revoked records included.
pub fn list_access_by_booklet(
    conn: &Connection,
    booklet_id: &Uuid,
) -> Result<Vec<BookletAccess>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCESS_COLS} FROM booklet_access WHERE booklet_id = ?1 ORDER BY granted_at ASC"
    ))?;
    let rows = stmt.query_map(params![booklet_id.to_string()], map_access_row)?;

    rows.map(|r| access_from_row(r?)).collect()
}

/// Active grants for a doctor (their patient list).
pub fn list_access_by_doctor(
    conn: &Connection,
    doctor_id: &str,
) -> Result<Vec<BookletAccess>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCESS_COLS} FROM booklet_access
         WHERE doctor_id = ?1 AND revoked_at IS NULL ORDER BY granted_at ASC"
    ))?;
    let rows = stmt.query_map(params![doctor_id], map_access_row)?;

    rows.map(|r| access_from_row(r?)).collect()
}

pub fn mark_access_revoked(
    conn: &Connection,
    id: &Uuid,
    at: NaiveDateTime,
) -> Result<Option<BookletAccess>, DatabaseError> {
    let changed = conn.execute(
        "UPDATE booklet_access SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        params![fmt_datetime(&at), id.to_string()],
    )?;

    if changed == 0 {
        return Ok(None);
    }
    get_access(conn, id)
}

pub fn set_access_patient_label(
    conn: &Connection,
    id: &Uuid,
    label: Option<&str>,
) -> Result<Option<BookletAccess>, DatabaseError> {
    let changed = conn.execute(
        "UPDATE booklet_access SET patient_label = ?1 WHERE id = ?2",
        params![label, id.to_string()],
    )?;

    if changed == 0 {
        return Ok(None);
    }
    get_access(conn, id)
}

// ═══════════════════════════════════════════
// Medical entries
// ═══════════════════════════════════════════

const ENTRY_COLS: &str = "id, booklet_id, doctor_id, visit_date, entry_type, notes,
     blood_pressure, weight_kg, temperature_c, heart_rate, fetal_heart_rate, fundal_height_cm,
     aog, diagnosis, recommendations, risk_level, follow_up_date, attachments, created_at";

struct EntryRow {
    id: String,
    booklet_id: String,
    doctor_id: String,
    visit_date: String,
    entry_type: String,
    notes: Option<String>,
    blood_pressure: Option<String>,
    weight_kg: Option<f64>,
    temperature_c: Option<f64>,
    heart_rate: Option<i32>,
    fetal_heart_rate: Option<i32>,
    fundal_height_cm: Option<f64>,
    aog: Option<String>,
    diagnosis: Option<String>,
    recommendations: Option<String>,
    risk_level: Option<String>,
    follow_up_date: Option<String>,
    attachments: String,
    created_at: String,
}

fn map_entry_row(row: &Row) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        booklet_id: row.get(1)?,
        doctor_id: row.get(2)?,
        visit_date: row.get(3)?,
        entry_type: row.get(4)?,
        notes: row.get(5)?,
        blood_pressure: row.get(6)?,
        weight_kg: row.get(7)?,
        temperature_c: row.get(8)?,
        heart_rate: row.get(9)?,
        fetal_heart_rate: row.get(10)?,
        fundal_height_cm: row.get(11)?,
        aog: row.get(12)?,
        diagnosis: row.get(13)?,
        recommendations: row.get(14)?,
        risk_level: row.get(15)?,
        follow_up_date: row.get(16)?,
        attachments: row.get(17)?,
        created_at: row.get(18)?,
    })
}

fn entry_from_row(row: EntryRow) -> Result<MedicalEntry, DatabaseError> {
    Ok(MedicalEntry {
        id: parse_uuid("entry.id", &row.id)?,
        booklet_id: parse_uuid("entry.booklet_id", &row.booklet_id)?,
        doctor_id: row.doctor_id,
        visit_date: parse_date("entry.visit_date", &row.visit_date)?,
        entry_type: EntryType::from_str(&row.entry_type)?,
        notes: row.notes,
        vitals: Vitals {
            blood_pressure: row.blood_pressure,
            weight_kg: row.weight_kg,
            temperature_c: row.temperature_c,
            heart_rate: row.heart_rate,
            fetal_heart_rate: row.fetal_heart_rate,
            fundal_height_cm: row.fundal_height_cm,
            aog: row.aog,
        },
        diagnosis: row.diagnosis,
        recommendations: row.recommendations,
        risk_level: row
            .risk_level
            .as_deref()
            .map(RiskLevel::from_str)
            .transpose()?,
        follow_up_date: parse_date_opt("entry.follow_up_date", row.follow_up_date)?,
        attachments: from_json("entry.attachments", &row.attachments)?,
        created_at: parse_datetime("entry.created_at", &row.created_at)?,
    })
}

pub fn insert_entry(conn: &Connection, entry: &MedicalEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medical_entries (id, booklet_id, doctor_id, visit_date, entry_type, notes,
         blood_pressure, weight_kg, temperature_c, heart_rate, fetal_heart_rate, fundal_height_cm,
         aog, diagnosis, recommendations, risk_level, follow_up_date, attachments, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            entry.id.to_string(),
            entry.booklet_id.to_string(),
            entry.doctor_id,
            fmt_date(&entry.visit_date),
            entry.entry_type.as_str(),
            entry.notes,
            entry.vitals.blood_pressure,
            entry.vitals.weight_kg,
            entry.vitals.temperature_c,
            entry.vitals.heart_rate,
            entry.vitals.fetal_heart_rate,
            entry.vitals.fundal_height_cm,
            entry.vitals.aog,
            entry.diagnosis,
            entry.recommendations,
            entry.risk_level.as_ref().map(|r| r.as_str()),
            entry.follow_up_date.as_ref().map(fmt_date),
            to_json("entry.attachments", &entry.attachments)?,
            fmt_datetime(&entry.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_entry(conn: &Connection, id: &Uuid) -> Result<Option<MedicalEntry>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {ENTRY_COLS} FROM medical_entries WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], map_entry_row);

    match result {
        Ok(row) => Ok(Some(entry_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Entries newest visit first; same-day entries keep creation order so
/// timeline groups render stably.
pub fn list_entries_by_booklet(
    conn: &Connection,
    booklet_id: &Uuid,
) -> Result<Vec<MedicalEntry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLS} FROM medical_entries
         WHERE booklet_id = ?1 ORDER BY visit_date DESC, created_at ASC"
    ))?;
    let rows = stmt.query_map(params![booklet_id.to_string()], map_entry_row)?;

    rows.map(|r| entry_from_row(r?)).collect()
}

/// Partial update for a medical entry. `None` fields leave the column alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryUpdate {
    pub entry_type: Option<EntryType>,
    pub notes: Option<String>,
    /// Replaces the whole vitals block when present.
    pub vitals: Option<Vitals>,
    pub diagnosis: Option<String>,
    pub recommendations: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub follow_up_date: Option<NaiveDate>,
    pub attachments: Option<Vec<String>>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.entry_type.is_none()
            && self.notes.is_none()
            && self.vitals.is_none()
            && self.diagnosis.is_none()
            && self.recommendations.is_none()
            && self.risk_level.is_none()
            && self.follow_up_date.is_none()
            && self.attachments.is_none()
    }
}

pub fn update_entry(
    conn: &Connection,
    id: &Uuid,
    update: &EntryUpdate,
) -> Result<Option<MedicalEntry>, DatabaseError> {
    if update.is_empty() {
        return get_entry(conn, id);
    }

    let mut sets: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    let mut push = |sets: &mut Vec<String>,
                    params_vec: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
                    col: &str,
                    value: Box<dyn rusqlite::types::ToSql>| {
        params_vec.push(value);
        sets.push(format!("{col} = ?{}", params_vec.len()));
    };

    if let Some(t) = &update.entry_type {
        push(&mut sets, &mut params_vec, "entry_type", Box::new(t.as_str()));
    }
    if let Some(n) = &update.notes {
        push(&mut sets, &mut params_vec, "notes", Box::new(n.clone()));
    }
    if let Some(v) = &update.vitals {
        push(&mut sets, &mut params_vec, "blood_pressure", Box::new(v.blood_pressure.clone()));
        push(&mut sets, &mut params_vec, "weight_kg", Box::new(v.weight_kg));
        push(&mut sets, &mut params_vec, "temperature_c", Box::new(v.temperature_c));
        push(&mut sets, &mut params_vec, "heart_rate", Box::new(v.heart_rate));
        push(&mut sets, &mut params_vec, "fetal_heart_rate", Box::new(v.fetal_heart_rate));
        push(&mut sets, &mut params_vec, "fundal_height_cm", Box::new(v.fundal_height_cm));
        push(&mut sets, &mut params_vec, "aog", Box::new(v.aog.clone()));
    }
    if let Some(d) = &update.diagnosis {
        push(&mut sets, &mut params_vec, "diagnosis", Box::new(d.clone()));
    }
    if let Some(r) = &update.recommendations {
        push(&mut sets, &mut params_vec, "recommendations", Box::new(r.clone()));
    }
    if let Some(r) = &update.risk_level {
        push(&mut sets, &mut params_vec, "risk_level", Box::new(r.as_str()));
    }
    if let Some(d) = &update.follow_up_date {
        push(&mut sets, &mut params_vec, "follow_up_date", Box::new(fmt_date(d)));
    }
    if let Some(a) = &update.attachments {
        let json = to_json("entry.attachments", a)?;
        push(&mut sets, &mut params_vec, "attachments", Box::new(json));
    }

    params_vec.push(Box::new(id.to_string()));
    let sql = format!(
        "UPDATE medical_entries SET {} WHERE id = ?{}",
        sets.join(", "),
        params_vec.len()
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_refs.as_slice())?;

    if changed == 0 {
        return Ok(None);
    }
    get_entry(conn, id)
}

// ═══════════════════════════════════════════
// Medications
// ═══════════════════════════════════════════

const MEDICATION_COLS: &str = "id, booklet_id, entry_id, name, dosage, instructions,
     start_date, end_date, frequency, times_of_day, is_active";

struct MedicationRow {
    id: String,
    booklet_id: String,
    entry_id: Option<String>,
    name: String,
    dosage: String,
    instructions: Option<String>,
    start_date: String,
    end_date: Option<String>,
    frequency: String,
    times_of_day: Option<String>,
    is_active: i32,
}

fn map_medication_row(row: &Row) -> rusqlite::Result<MedicationRow> {
    Ok(MedicationRow {
        id: row.get(0)?,
        booklet_id: row.get(1)?,
        entry_id: row.get(2)?,
        name: row.get(3)?,
        dosage: row.get(4)?,
        instructions: row.get(5)?,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        frequency: row.get(8)?,
        times_of_day: row.get(9)?,
        is_active: row.get(10)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<Medication, DatabaseError> {
    Ok(Medication {
        id: parse_uuid("medication.id", &row.id)?,
        booklet_id: parse_uuid("medication.booklet_id", &row.booklet_id)?,
        entry_id: parse_uuid_opt("medication.entry_id", row.entry_id)?,
        name: row.name,
        dosage: row.dosage,
        instructions: row.instructions,
        start_date: parse_date("medication.start_date", &row.start_date)?,
        end_date: parse_date_opt("medication.end_date", row.end_date)?,
        frequency: Frequency::from_str(&row.frequency)?,
        times_of_day: row
            .times_of_day
            .as_deref()
            .map(|s| from_json("medication.times_of_day", s))
            .transpose()?,
        is_active: row.is_active != 0,
    })
}

fn medication_insert_params(
    medication: &Medication,
) -> Result<Vec<Box<dyn rusqlite::types::ToSql>>, DatabaseError> {
    Ok(vec![
        Box::new(medication.id.to_string()),
        Box::new(medication.booklet_id.to_string()),
        Box::new(medication.entry_id.map(|id| id.to_string())),
        Box::new(medication.name.clone()),
        Box::new(medication.dosage.clone()),
        Box::new(medication.instructions.clone()),
        Box::new(fmt_date(&medication.start_date)),
        Box::new(medication.end_date.as_ref().map(fmt_date)),
        Box::new(medication.frequency.as_str()),
        Box::new(
            medication
                .times_of_day
                .as_ref()
                .map(|t| to_json("medication.times_of_day", t))
                .transpose()?,
        ),
        Box::new(medication.is_active as i32),
    ])
}

pub fn insert_medication(conn: &Connection, medication: &Medication) -> Result<(), DatabaseError> {
    let p = medication_insert_params(medication)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = p.iter().map(|b| b.as_ref()).collect();
    conn.execute(
        "INSERT INTO medications (id, booklet_id, entry_id, name, dosage, instructions,
         start_date, end_date, frequency, times_of_day, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        refs.as_slice(),
    )?;
    Ok(())
}

/// Idempotent insert keyed on the record id. Returns whether a row was
/// actually written, so retried visit saves can skip already-inserted drafts.
pub fn insert_medication_if_absent(
    conn: &Connection,
    medication: &Medication,
) -> Result<bool, DatabaseError> {
    let p = medication_insert_params(medication)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = p.iter().map(|b| b.as_ref()).collect();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO medications (id, booklet_id, entry_id, name, dosage, instructions,
         start_date, end_date, frequency, times_of_day, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        refs.as_slice(),
    )?;
    Ok(changed == 1)
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<Option<Medication>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {MEDICATION_COLS} FROM medications WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], map_medication_row);

    match result {
        Ok(row) => Ok(Some(medication_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_medications_by_booklet(
    conn: &Connection,
    booklet_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLS} FROM medications
         WHERE booklet_id = ?1 ORDER BY start_date DESC, name ASC"
    ))?;
    let rows = stmt.query_map(params![booklet_id.to_string()], map_medication_row)?;

    rows.map(|r| medication_from_row(r?)).collect()
}

pub fn list_medications_by_entry(
    conn: &Connection,
    entry_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLS} FROM medications WHERE entry_id = ?1 ORDER BY name ASC"
    ))?;
    let rows = stmt.query_map(params![entry_id.to_string()], map_medication_row)?;

    rows.map(|r| medication_from_row(r?)).collect()
}

/// Partial update produced by the window engine's extend/stop actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedicationUpdate {
    pub end_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

pub fn update_medication(
    conn: &Connection,
    id: &Uuid,
    update: &MedicationUpdate,
) -> Result<Option<Medication>, DatabaseError> {
    if update.end_date.is_none() && update.is_active.is_none() {
        return get_medication(conn, id);
    }

    let mut sets: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(end) = &update.end_date {
        params_vec.push(Box::new(fmt_date(end)));
        sets.push(format!("end_date = ?{}", params_vec.len()));
    }
    if let Some(active) = update.is_active {
        params_vec.push(Box::new(active as i32));
        sets.push(format!("is_active = ?{}", params_vec.len()));
    }

    params_vec.push(Box::new(id.to_string()));
    let sql = format!(
        "UPDATE medications SET {} WHERE id = ?{}",
        sets.join(", "),
        params_vec.len()
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_refs.as_slice())?;

    if changed == 0 {
        return Ok(None);
    }
    get_medication(conn, id)
}

/// Hard delete, intake logs cascade. Only the visit manager's deleted-drafts
/// path calls this; dispensed medications are stopped, never deleted.
/// Returns whether a row was removed.
pub fn delete_medication(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM medications WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed == 1)
}

// ═══════════════════════════════════════════
// Intake logs
// ═══════════════════════════════════════════

const INTAKE_COLS: &str = "id, medication_id, scheduled_date, dose_index, status, taken_at,
     recorded_by, notes, created_at";

struct IntakeRow {
    id: String,
    medication_id: String,
    scheduled_date: String,
    dose_index: u32,
    status: String,
    taken_at: Option<String>,
    recorded_by: String,
    notes: Option<String>,
    created_at: String,
}

fn map_intake_row(row: &Row) -> rusqlite::Result<IntakeRow> {
    Ok(IntakeRow {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        scheduled_date: row.get(2)?,
        dose_index: row.get(3)?,
        status: row.get(4)?,
        taken_at: row.get(5)?,
        recorded_by: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn intake_from_row(row: IntakeRow) -> Result<MedicationIntakeLog, DatabaseError> {
    Ok(MedicationIntakeLog {
        id: parse_uuid("intake_log.id", &row.id)?,
        medication_id: parse_uuid("intake_log.medication_id", &row.medication_id)?,
        scheduled_date: parse_date("intake_log.scheduled_date", &row.scheduled_date)?,
        dose_index: row.dose_index,
        status: IntakeStatus::from_str(&row.status)?,
        taken_at: parse_datetime_opt("intake_log.taken_at", row.taken_at)?,
        recorded_by: row.recorded_by,
        notes: row.notes,
        created_at: parse_datetime("intake_log.created_at", &row.created_at)?,
    })
}

/// Write one dose slot. Logging the same (medication, date, dose index) slot
/// again overwrites the earlier record instead of duplicating it.
///
/// The dose index is validated against the medication's doses/day, and the
/// medication must exist.
pub fn upsert_intake_log(
    conn: &Connection,
    log: &MedicationIntakeLog,
) -> Result<(), DatabaseError> {
    let medication = get_medication(conn, &log.medication_id)?
        .ok_or_else(|| DatabaseError::not_found("medication", log.medication_id))?;

    if log.dose_index >= medication.frequency.doses_per_day() {
        return Err(DatabaseError::validation(
            "dose_index",
            format!(
                "index {} out of range for {} doses/day",
                log.dose_index,
                medication.frequency.doses_per_day()
            ),
        ));
    }

    conn.execute(
        "INSERT INTO medication_intake_logs
         (id, medication_id, scheduled_date, dose_index, status, taken_at, recorded_by, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (medication_id, scheduled_date, dose_index) DO UPDATE SET
             status = excluded.status,
             taken_at = excluded.taken_at,
             recorded_by = excluded.recorded_by,
             notes = excluded.notes",
        params![
            log.id.to_string(),
            log.medication_id.to_string(),
            fmt_date(&log.scheduled_date),
            log.dose_index,
            log.status.as_str(),
            log.taken_at.as_ref().map(fmt_datetime),
            log.recorded_by,
            log.notes,
            fmt_datetime(&log.created_at),
        ],
    )?;
    Ok(())
}

pub fn list_intake_logs(
    conn: &Connection,
    medication_id: &Uuid,
    since: Option<NaiveDate>,
) -> Result<Vec<MedicationIntakeLog>, DatabaseError> {
    let mut stmt;
    let rows = match since {
        Some(floor) => {
            stmt = conn.prepare(&format!(
                "SELECT {INTAKE_COLS} FROM medication_intake_logs
                 WHERE medication_id = ?1 AND scheduled_date >= ?2
                 ORDER BY scheduled_date ASC, dose_index ASC"
            ))?;
            stmt.query_map(params![medication_id.to_string(), fmt_date(&floor)], map_intake_row)?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {INTAKE_COLS} FROM medication_intake_logs
                 WHERE medication_id = ?1 ORDER BY scheduled_date ASC, dose_index ASC"
            ))?;
            stmt.query_map(params![medication_id.to_string()], map_intake_row)?
        }
    };

    rows.map(|r| intake_from_row(r?)).collect()
}

// ═══════════════════════════════════════════
// Lab requests
// ═══════════════════════════════════════════

const LAB_COLS: &str = "id, booklet_id, entry_id, requested_by, description, status, priority,
     due_date, requested_date, completed_date, results, notes, attachments, uploaded_by";

struct LabRow {
    id: String,
    booklet_id: String,
    entry_id: Option<String>,
    requested_by: Option<String>,
    description: String,
    status: String,
    priority: Option<String>,
    due_date: Option<String>,
    requested_date: String,
    completed_date: Option<String>,
    results: Option<String>,
    notes: Option<String>,
    attachments: String,
    uploaded_by: Option<String>,
}

fn map_lab_row(row: &Row) -> rusqlite::Result<LabRow> {
    Ok(LabRow {
        id: row.get(0)?,
        booklet_id: row.get(1)?,
        entry_id: row.get(2)?,
        requested_by: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        due_date: row.get(7)?,
        requested_date: row.get(8)?,
        completed_date: row.get(9)?,
        results: row.get(10)?,
        notes: row.get(11)?,
        attachments: row.get(12)?,
        uploaded_by: row.get(13)?,
    })
}

fn lab_from_row(row: LabRow) -> Result<LabRequest, DatabaseError> {
    Ok(LabRequest {
        id: parse_uuid("lab.id", &row.id)?,
        booklet_id: parse_uuid("lab.booklet_id", &row.booklet_id)?,
        entry_id: parse_uuid_opt("lab.entry_id", row.entry_id)?,
        requested_by: row.requested_by,
        description: row.description,
        status: LabStatus::from_str(&row.status)?,
        priority: row
            .priority
            .as_deref()
            .map(LabPriority::from_str)
            .transpose()?,
        due_date: parse_date_opt("lab.due_date", row.due_date)?,
        requested_date: parse_date("lab.requested_date", &row.requested_date)?,
        completed_date: parse_date_opt("lab.completed_date", row.completed_date)?,
        results: row.results,
        notes: row.notes,
        attachments: from_json("lab.attachments", &row.attachments)?,
        uploaded_by: row.uploaded_by,
    })
}

fn lab_insert_params(
    lab: &LabRequest,
) -> Result<Vec<Box<dyn rusqlite::types::ToSql>>, DatabaseError> {
    Ok(vec![
        Box::new(lab.id.to_string()),
        Box::new(lab.booklet_id.to_string()),
        Box::new(lab.entry_id.map(|id| id.to_string())),
        Box::new(lab.requested_by.clone()),
        Box::new(lab.description.clone()),
        Box::new(lab.status.as_str()),
        Box::new(lab.priority.as_ref().map(|p| p.as_str())),
        Box::new(lab.due_date.as_ref().map(fmt_date)),
        Box::new(fmt_date(&lab.requested_date)),
        Box::new(lab.completed_date.as_ref().map(fmt_date)),
        Box::new(lab.results.clone()),
        Box::new(lab.notes.clone()),
        Box::new(to_json("lab.attachments", &lab.attachments)?),
        Box::new(lab.uploaded_by.clone()),
    ])
}

pub fn insert_lab_request(conn: &Connection, lab: &LabRequest) -> Result<(), DatabaseError> {
    let p = lab_insert_params(lab)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = p.iter().map(|b| b.as_ref()).collect();
    conn.execute(
        "INSERT INTO lab_requests (id, booklet_id, entry_id, requested_by, description, status,
         priority, due_date, requested_date, completed_date, results, notes, attachments, uploaded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        refs.as_slice(),
    )?;
    Ok(())
}

/// Idempotent variant keyed on the record id, for retried visit saves.
pub fn insert_lab_request_if_absent(
    conn: &Connection,
    lab: &LabRequest,
) -> Result<bool, DatabaseError> {
    let p = lab_insert_params(lab)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = p.iter().map(|b| b.as_ref()).collect();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO lab_requests (id, booklet_id, entry_id, requested_by, description,
         status, priority, due_date, requested_date, completed_date, results, notes, attachments, uploaded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        refs.as_slice(),
    )?;
    Ok(changed == 1)
}

pub fn get_lab_request(conn: &Connection, id: &Uuid) -> Result<Option<LabRequest>, DatabaseError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {LAB_COLS} FROM lab_requests WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], map_lab_row);

    match result {
        Ok(row) => Ok(Some(lab_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_labs_by_booklet(
    conn: &Connection,
    booklet_id: &Uuid,
) -> Result<Vec<LabRequest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAB_COLS} FROM lab_requests
         WHERE booklet_id = ?1 ORDER BY requested_date DESC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![booklet_id.to_string()], map_lab_row)?;

    rows.map(|r| lab_from_row(r?)).collect()
}

pub fn list_labs_by_entry(
    conn: &Connection,
    entry_id: &Uuid,
) -> Result<Vec<LabRequest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAB_COLS} FROM lab_requests WHERE entry_id = ?1 ORDER BY rowid ASC"
    ))?;
    let rows = stmt.query_map(params![entry_id.to_string()], map_lab_row)?;

    rows.map(|r| lab_from_row(r?)).collect()
}

/// Partial update produced by the lab state machine.
#[derive(Debug, Clone, Default)]
pub struct LabUpdate {
    pub status: Option<LabStatus>,
    pub completed_date: Option<NaiveDate>,
    pub results: Option<String>,
    pub notes: Option<String>,
    /// Replaces the attachment list when present.
    pub attachments: Option<Vec<String>>,
    pub uploaded_by: Option<String>,
}

pub fn update_lab_request(
    conn: &Connection,
    id: &Uuid,
    update: &LabUpdate,
) -> Result<Option<LabRequest>, DatabaseError> {
    let mut sets: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(s) = &update.status {
        params_vec.push(Box::new(s.as_str()));
        sets.push(format!("status = ?{}", params_vec.len()));
    }
    if let Some(d) = &update.completed_date {
        params_vec.push(Box::new(fmt_date(d)));
        sets.push(format!("completed_date = ?{}", params_vec.len()));
    }
    if let Some(r) = &update.results {
        params_vec.push(Box::new(r.clone()));
        sets.push(format!("results = ?{}", params_vec.len()));
    }
    if let Some(n) = &update.notes {
        params_vec.push(Box::new(n.clone()));
        sets.push(format!("notes = ?{}", params_vec.len()));
    }
    if let Some(a) = &update.attachments {
        params_vec.push(Box::new(to_json("lab.attachments", a)?));
        sets.push(format!("attachments = ?{}", params_vec.len()));
    }
    if let Some(u) = &update.uploaded_by {
        params_vec.push(Box::new(u.clone()));
        sets.push(format!("uploaded_by = ?{}", params_vec.len()));
    }

    if sets.is_empty() {
        return get_lab_request(conn, id);
    }

    params_vec.push(Box::new(id.to_string()));
    let sql = format!(
        "UPDATE lab_requests SET {} WHERE id = ?{}",
        sets.join(", "),
        params_vec.len()
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_refs.as_slice())?;

    if changed == 0 {
        return Ok(None);
    }
    get_lab_request(conn, id)
}

/// Hard delete, visit-manager draft path only. Labs on finalized entries are
/// cancelled, never deleted. Returns whether a row was removed.
pub fn delete_lab_request(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM lab_requests WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed == 1)
}
