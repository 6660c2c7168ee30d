use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use super::types::*;
use crate::db::{self, DatabaseError};
use crate::medications::is_active_on;
use crate::models::enums::LabStatus;
use crate::temporal::{aog_from_due_date, aog_from_lmp};

/// Group items by calendar date, most recent group first. Within a group
/// the input order is preserved, so callers feed pre-sorted lists and get
/// stable display order.
pub fn group_by_day<T, F>(items: Vec<T>, date_of: F) -> Vec<DayGroup<T>>
where
    F: Fn(&T) -> NaiveDate,
{
    let mut groups: Vec<DayGroup<T>> = Vec::new();
    for item in items {
        let date = date_of(&item);
        match groups.iter_mut().find(|g| g.date == date) {
            Some(group) => group.items.push(item),
            None => groups.push(DayGroup {
                date,
                items: vec![item],
            }),
        }
    }
    groups.sort_by(|a, b| b.date.cmp(&a.date));
    groups
}

/// The date preselected on first load: the most recent one.
pub fn default_selection<T>(groups: &[DayGroup<T>]) -> Option<NaiveDate> {
    groups.first().map(|g| g.date)
}

/// Entries and labs for a booklet merged into per-day buckets, newest first.
pub fn booklet_timeline(
    conn: &Connection,
    booklet_id: &Uuid,
) -> Result<BookletTimeline, DatabaseError> {
    db::get_booklet(conn, booklet_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet", booklet_id))?;

    let entries = db::list_entries_by_booklet(conn, booklet_id)?;
    let labs = db::list_labs_by_booklet(conn, booklet_id)?;

    let entry_groups = group_by_day(entries, |e| e.visit_date);
    let lab_groups = group_by_day(labs, |l| l.requested_date);

    let mut days: Vec<TimelineDay> = entry_groups
        .into_iter()
        .map(|g| TimelineDay {
            date: g.date,
            entries: g.items,
            labs: vec![],
        })
        .collect();

    for group in lab_groups {
        match days.iter_mut().find(|d| d.date == group.date) {
            Some(day) => day.labs = group.items,
            None => days.push(TimelineDay {
                date: group.date,
                entries: vec![],
                labs: group.items,
            }),
        }
    }
    days.sort_by(|a, b| b.date.cmp(&a.date));

    let default_selected_date = days.first().map(|d| d.date);
    Ok(BookletTimeline {
        days,
        default_selected_date,
    })
}

/// Derived header counts for one booklet as of `today`. O(n) over the
/// booklet's records on every call; nothing here is cached or persisted.
pub fn summarize(
    conn: &Connection,
    booklet_id: &Uuid,
    today: NaiveDate,
) -> Result<BookletSummary, DatabaseError> {
    let booklet = db::get_booklet(conn, booklet_id)?
        .ok_or_else(|| DatabaseError::not_found("booklet", booklet_id))?;

    let medications = db::list_medications_by_booklet(conn, booklet_id)?;
    let labs = db::list_labs_by_booklet(conn, booklet_id)?;
    let entries = db::list_entries_by_booklet(conn, booklet_id)?;

    let active_medication_count = medications
        .iter()
        .filter(|m| is_active_on(m, today))
        .count() as u32;
    let pending_lab_count = labs
        .iter()
        .filter(|l| l.status == LabStatus::Pending)
        .count() as u32;

    let last_visit_date = entries
        .iter()
        .map(|e| e.visit_date)
        .filter(|d| *d <= today)
        .max();
    let next_appointment = entries
        .iter()
        .filter_map(|e| e.follow_up_date)
        .filter(|d| *d > today)
        .min();

    let current_aog = booklet
        .due_date
        .and_then(|due| aog_from_due_date(due, today))
        .or_else(|| booklet.lmp_date.and_then(|lmp| aog_from_lmp(lmp, today)));

    Ok(BookletSummary {
        booklet_id: booklet.id,
        label: booklet.label,
        status: booklet.status,
        risk_level: booklet.risk_level,
        active_medication_count,
        pending_lab_count,
        has_allergies: !booklet.allergies.is_empty(),
        last_visit_date,
        next_appointment,
        current_aog,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{create_booklet, grant_access, NewBooklet};
    use crate::db::sqlite::open_memory_database;
    use crate::db::EntryUpdate;
    use crate::models::enums::EntryType;
    use crate::visit::{save_visit, LabDraft, MedicationDraft, SaveVisitRequest};
    use chrono::NaiveDateTime;

    fn test_db() -> Connection {
        open_memory_database().expect("in-memory DB")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn now() -> NaiveDateTime {
        date("2025-03-10").and_hms_opt(10, 0, 0).unwrap()
    }

    fn seed_booklet(conn: &Connection) -> Uuid {
        let booklet = create_booklet(
            conn,
            &NewBooklet {
                patient_id: "patient-1".into(),
                label: "First pregnancy".into(),
                lmp_date: Some(date("2025-01-01")),
                due_date: None,
                risk_level: None,
                notes: None,
                allergies: vec!["penicillin".into()],
                conditions: vec![],
            },
            now(),
        )
        .unwrap();
        grant_access(conn, &booklet.id, "doctor-1", now()).unwrap();
        booklet.id
    }

    fn visit_on(
        booklet_id: Uuid,
        day: &str,
        medications: Vec<MedicationDraft>,
        labs: Vec<LabDraft>,
    ) -> SaveVisitRequest {
        SaveVisitRequest {
            booklet_id,
            doctor_id: "doctor-1".into(),
            visit_date: date(day),
            existing_entry_id: None,
            entry: EntryUpdate {
                entry_type: Some(EntryType::PrenatalCheckup),
                ..EntryUpdate::default()
            },
            medication_drafts: medications,
            lab_drafts: labs,
            deleted_medication_ids: vec![],
            deleted_lab_ids: vec![],
        }
    }

    fn medication_draft(name: &str, end: Option<&str>) -> MedicationDraft {
        MedicationDraft {
            draft_id: Uuid::new_v4(),
            name: name.into(),
            dosage: "1 tab".into(),
            instructions: None,
            start_date: None,
            end_date: end.map(date),
            frequency: crate::models::enums::Frequency::OnceDaily,
            times_of_day: None,
        }
    }

    fn lab_draft(description: &str) -> LabDraft {
        LabDraft {
            draft_id: Uuid::new_v4(),
            description: description.into(),
            priority: None,
            due_date: None,
            notes: None,
        }
    }

    #[test]
    fn groups_sorted_descending_with_stable_order_within_day() {
        let items = vec![
            ("a", date("2025-03-01")),
            ("b", date("2025-03-05")),
            ("c", date("2025-03-01")),
            ("d", date("2025-03-05")),
        ];
        let groups = group_by_day(items, |(_, d)| *d);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, date("2025-03-05"));
        let names: Vec<_> = groups[0].items.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["b", "d"]);
        let names: Vec<_> = groups[1].items.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn default_selection_is_most_recent() {
        let groups = group_by_day(
            vec![date("2025-01-01"), date("2025-02-01")],
            |d| *d,
        );
        assert_eq!(default_selection(&groups), Some(date("2025-02-01")));
        assert_eq!(default_selection::<NaiveDate>(&[]), None);
    }

    #[test]
    fn timeline_merges_entries_and_labs_per_day() {
        let mut conn = test_db();
        let booklet_id = seed_booklet(&conn);

        save_visit(
            &mut conn,
            &visit_on(booklet_id, "2025-02-01", vec![], vec![lab_draft("CBC")]),
            now(),
        )
        .unwrap();
        save_visit(
            &mut conn,
            &visit_on(booklet_id, "2025-03-01", vec![], vec![]),
            now(),
        )
        .unwrap();

        let timeline = booklet_timeline(&conn, &booklet_id).unwrap();
        assert_eq!(timeline.days.len(), 2);
        assert_eq!(timeline.default_selected_date, Some(date("2025-03-01")));

        let older = &timeline.days[1];
        assert_eq!(older.date, date("2025-02-01"));
        assert_eq!(older.entries.len(), 1);
        assert_eq!(older.labs.len(), 1);
    }

    #[test]
    fn timeline_for_unknown_booklet_is_not_found() {
        let conn = test_db();
        assert!(matches!(
            booklet_timeline(&conn, &Uuid::new_v4()),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn summary_counts_recomputed_from_records() {
        let mut conn = test_db();
        let booklet_id = seed_booklet(&conn);

        // One expired course, one running, one pending lab
        save_visit(
            &mut conn,
            &visit_on(
                booklet_id,
                "2025-02-01",
                vec![medication_draft("old course", Some("2025-02-10"))],
                vec![],
            ),
            now(),
        )
        .unwrap();
        let mut request = visit_on(
            booklet_id,
            "2025-03-01",
            vec![medication_draft("ferrous sulfate", None)],
            vec![lab_draft("OGTT")],
        );
        request.entry.follow_up_date = Some(date("2025-04-01"));
        save_visit(&mut conn, &request, now()).unwrap();

        let summary = summarize(&conn, &booklet_id, date("2025-03-10")).unwrap();
        assert_eq!(summary.active_medication_count, 1);
        assert_eq!(summary.pending_lab_count, 1);
        assert!(summary.has_allergies);
        assert_eq!(summary.last_visit_date, Some(date("2025-03-01")));
        assert_eq!(summary.next_appointment, Some(date("2025-04-01")));
        // LMP 2025-01-01, today 2025-03-10 -> 68 days -> 9 weeks 5 days
        let aog = summary.current_aog.unwrap();
        assert_eq!((aog.weeks, aog.days), (9, 5));
    }

    #[test]
    fn summary_ignores_future_visits_for_last_visit() {
        let mut conn = test_db();
        let booklet_id = seed_booklet(&conn);

        save_visit(
            &mut conn,
            &visit_on(booklet_id, "2025-04-01", vec![], vec![]),
            now(),
        )
        .unwrap();

        let summary = summarize(&conn, &booklet_id, date("2025-03-10")).unwrap();
        assert!(summary.last_visit_date.is_none());
    }
}
