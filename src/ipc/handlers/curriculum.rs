use crate::calc::{Section, Subject, SubjectMaxima};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// A curriculum subject as stored, with its row id attached.
pub struct SubjectRow {
    pub id: String,
    pub subject: Subject,
}

pub struct SectionRow {
    pub id: String,
    pub category: String,
    pub subjects: Vec<SubjectRow>,
}

fn read_maxima(row: &rusqlite::Row<'_>, first_col: usize) -> rusqlite::Result<SubjectMaxima> {
    Ok(SubjectMaxima {
        period1: row.get(first_col)?,
        period2: row.get(first_col + 1)?,
        exam1: row.get(first_col + 2)?,
        sem1_total: row.get(first_col + 3)?,
        period3: row.get(first_col + 4)?,
        period4: row.get(first_col + 5)?,
        exam2: row.get(first_col + 6)?,
        sem2_total: row.get(first_col + 7)?,
        general_total: row.get(first_col + 8)?,
    })
}

/// Sections whose subject set applies to the given class level, in curriculum
/// order. Used by grade entry (maxima lookup) and bulletin assembly.
pub fn load_sections_for_level(
    conn: &Connection,
    level: &str,
) -> rusqlite::Result<Vec<SectionRow>> {
    let mut section_stmt = conn.prepare(
        "SELECT s.id, s.category
         FROM sections s
         JOIN section_classes sc ON sc.section_id = s.id
         WHERE sc.level = ?
         ORDER BY s.sort_order",
    )?;
    let sections: Vec<(String, String)> = section_stmt
        .query_map([level], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subject_stmt = conn.prepare(
        "SELECT id, name,
                max_period1, max_period2, max_exam1, max_sem1_total,
                max_period3, max_period4, max_exam2, max_sem2_total,
                max_general_total
         FROM subjects
         WHERE section_id = ?
         ORDER BY sort_order",
    )?;

    let mut out = Vec::with_capacity(sections.len());
    for (section_id, category) in sections {
        let subjects: Vec<SubjectRow> = subject_stmt
            .query_map([&section_id], |r| {
                Ok(SubjectRow {
                    id: r.get(0)?,
                    subject: Subject {
                        name: r.get(1)?,
                        maxima: read_maxima(r, 2)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(SectionRow {
            id: section_id,
            category,
            subjects,
        });
    }
    Ok(out)
}

pub fn subject_maxima(
    conn: &Connection,
    subject_id: &str,
) -> rusqlite::Result<Option<SubjectMaxima>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT max_period1, max_period2, max_exam1, max_sem1_total,
                max_period3, max_period4, max_exam2, max_sem2_total,
                max_general_total
         FROM subjects WHERE id = ?",
        [subject_id],
        |r| read_maxima(r, 0),
    )
    .optional()
}

fn handle_curriculum_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(raw) = req.params.get("sections") else {
        return err(&req.id, "bad_params", "missing sections", None);
    };
    let sections: Vec<Section> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid sections: {}", e),
                None,
            )
        }
    };
    for section in &sections {
        if section.category.trim().is_empty() {
            return err(&req.id, "bad_params", "section category must not be empty", None);
        }
        for subject in &section.subjects {
            if subject.name.trim().is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    "subject name must not be empty",
                    Some(json!({ "category": section.category })),
                );
            }
            let m = &subject.maxima;
            let slots = [
                ("period1", m.period1),
                ("period2", m.period2),
                ("exam1", m.exam1),
                ("sem1Total", m.sem1_total),
                ("period3", m.period3),
                ("period4", m.period4),
                ("exam2", m.exam2),
                ("sem2Total", m.sem2_total),
                ("generalTotal", m.general_total),
            ];
            for (slot, value) in slots {
                if !value.is_finite() || value < 0.0 {
                    return err(
                        &req.id,
                        "bad_params",
                        "maxima must be >= 0",
                        Some(json!({ "subject": subject.name, "slot": slot, "value": value })),
                    );
                }
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Reference data is replaced wholesale; grade rows tied to removed
    // subjects go with them (curriculum load precedes any grade entry).
    let wipe: [(&str, &str); 4] = [
        (
            "grade_rows",
            "DELETE FROM grade_rows
             WHERE subject_id IN (SELECT id FROM subjects)",
        ),
        ("subjects", "DELETE FROM subjects"),
        ("section_classes", "DELETE FROM section_classes"),
        ("sections", "DELETE FROM sections"),
    ];
    for (table, sql) in wipe {
        if let Err(e) = tx.execute(sql, []) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    let mut subject_count = 0usize;
    for (section_idx, section) in sections.iter().enumerate() {
        let section_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO sections(id, category, sort_order) VALUES(?, ?, ?)",
            (&section_id, section.category.trim(), section_idx as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "sections" })),
            );
        }
        for level in &section.levels {
            if let Err(e) = tx.execute(
                "INSERT OR IGNORE INTO section_classes(section_id, level) VALUES(?, ?)",
                (&section_id, level.trim()),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "section_classes" })),
                );
            }
        }
        for (subject_idx, subject) in section.subjects.iter().enumerate() {
            let m = &subject.maxima;
            if let Err(e) = tx.execute(
                "INSERT INTO subjects(id, section_id, name, sort_order,
                    max_period1, max_period2, max_exam1, max_sem1_total,
                    max_period3, max_period4, max_exam2, max_sem2_total,
                    max_general_total)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    section_id,
                    subject.name.trim(),
                    subject_idx as i64,
                    m.period1,
                    m.period2,
                    m.exam1,
                    m.sem1_total,
                    m.period3,
                    m.period4,
                    m.exam2,
                    m.sem2_total,
                    m.general_total,
                ],
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "subjects" })),
                );
            }
            subject_count += 1;
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    debug!(sections = sections.len(), subjects = subject_count, "curriculum replaced");
    ok(
        &req.id,
        json!({ "sections": sections.len(), "subjects": subject_count }),
    )
}

fn handle_curriculum_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let level = req.params.get("level").and_then(|v| v.as_str());

    let rows = if let Some(level) = level {
        load_sections_for_level(conn, level)
    } else {
        load_all_sections(conn)
    };
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let levels_of = |section_id: &str| -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT level FROM section_classes WHERE section_id = ? ORDER BY level",
        )?;
        let levels = stmt
            .query_map([section_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(levels)
    };

    let mut sections = Vec::with_capacity(rows.len());
    for row in rows {
        let levels = match levels_of(&row.id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let subjects: Vec<serde_json::Value> = row
            .subjects
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "name": s.subject.name,
                    "maxima": s.subject.maxima,
                })
            })
            .collect();
        sections.push(json!({
            "id": row.id,
            "category": row.category,
            "levels": levels,
            "subjects": subjects,
        }));
    }

    ok(&req.id, json!({ "sections": sections }))
}

fn load_all_sections(conn: &Connection) -> rusqlite::Result<Vec<SectionRow>> {
    let mut section_stmt =
        conn.prepare("SELECT id, category FROM sections ORDER BY sort_order")?;
    let sections: Vec<(String, String)> = section_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subject_stmt = conn.prepare(
        "SELECT id, name,
                max_period1, max_period2, max_exam1, max_sem1_total,
                max_period3, max_period4, max_exam2, max_sem2_total,
                max_general_total
         FROM subjects
         WHERE section_id = ?
         ORDER BY sort_order",
    )?;

    let mut out = Vec::with_capacity(sections.len());
    for (section_id, category) in sections {
        let subjects: Vec<SubjectRow> = subject_stmt
            .query_map([&section_id], |r| {
                Ok(SubjectRow {
                    id: r.get(0)?,
                    subject: Subject {
                        name: r.get(1)?,
                        maxima: read_maxima(r, 2)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(SectionRow {
            id: section_id,
            category,
            subjects,
        });
    }
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "curriculum.save" => Some(handle_curriculum_save(state, req)),
        "curriculum.list" => Some(handle_curriculum_list(state, req)),
        _ => None,
    }
}
