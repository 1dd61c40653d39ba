use crate::calc::{
    compute_max_totals, compute_percentages, compute_ranking, compute_totals, AggregateColumn,
    GradeRow, Section,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

struct ClassRow {
    name: String,
    level: String,
    titulaire: Option<String>,
}

struct RosterStudent {
    id: String,
    display_name: String,
    active: bool,
}

fn load_class(conn: &Connection, class_id: &str) -> Result<ClassRow, HandlerErr> {
    let row: Option<ClassRow> = conn
        .query_row(
            "SELECT name, level, titulaire FROM classes WHERE id = ?",
            [class_id],
            |r| {
                Ok(ClassRow {
                    name: r.get(0)?,
                    level: r.get(1)?,
                    titulaire: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    row.ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

fn load_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, active
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(RosterStudent {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
            active: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// All grade rows of a class, keyed by (student, subject).
fn load_class_rows(
    conn: &Connection,
    class_id: &str,
) -> Result<HashMap<(String, String), GradeRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, subject_id,
                    period1, period2, exam1, period3, period4, exam2
             FROM grade_rows
             WHERE class_id = ?",
        )
        .map_err(HandlerErr::query)?;
    let mut map = HashMap::new();
    let rows = stmt
        .query_map([class_id], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let row = GradeRow {
                period1: r.get::<_, Option<f64>>(2)?.into(),
                period2: r.get::<_, Option<f64>>(3)?.into(),
                exam1: r.get::<_, Option<f64>>(4)?.into(),
                period3: r.get::<_, Option<f64>>(5)?.into(),
                period4: r.get::<_, Option<f64>>(6)?.into(),
                exam2: r.get::<_, Option<f64>>(7)?.into(),
            };
            Ok((student_id, subject_id, row))
        })
        .map_err(HandlerErr::query)?;
    for entry in rows {
        let (student_id, subject_id, row) = entry.map_err(HandlerErr::query)?;
        map.insert((student_id, subject_id), row);
    }
    Ok(map)
}

fn school_header(conn: &Connection) -> serde_json::Value {
    match db::settings_get_json(conn, "school.info") {
        Ok(Some(v)) => v,
        _ => json!({ "name": null, "yearLabel": null }),
    }
}

/// Assembles the full report-card model for one student. Partially graded
/// sheets still produce a model; missing cells stay null and sum as zero.
fn build_model(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let class = load_class(conn, class_id)?;
    let roster = load_roster(conn, class_id)?;
    let Some(student) = roster.iter().find(|s| s.id == student_id) else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let sections = super::curriculum::load_sections_for_level(conn, &class.level)
        .map_err(HandlerErr::query)?;
    let class_rows = load_class_rows(conn, class_id)?;

    // Subject order is the curriculum order; every consumer below follows it.
    let subject_ids: Vec<&str> = sections
        .iter()
        .flat_map(|s| s.subjects.iter().map(|sub| sub.id.as_str()))
        .collect();

    let rows_for = |sid: &str| -> Vec<GradeRow> {
        subject_ids
            .iter()
            .map(|subject_id| {
                class_rows
                    .get(&(sid.to_string(), subject_id.to_string()))
                    .copied()
                    .unwrap_or_default()
            })
            .collect()
    };

    let student_rows = rows_for(student_id);
    let totals = compute_totals(&student_rows);

    let calc_sections: Vec<Section> = sections
        .iter()
        .map(|s| Section {
            category: s.category.clone(),
            levels: Vec::new(),
            subjects: s.subjects.iter().map(|sub| sub.subject.clone()).collect(),
        })
        .collect();
    let max_totals = compute_max_totals(&calc_sections);
    let percentages = compute_percentages(&totals, &max_totals);

    // Peer aggregates in roster order; ranking recomputed per column since a
    // student's standing differs between periods.
    let peer_totals: Vec<(String, crate::calc::Totals)> = roster
        .iter()
        .filter(|s| s.active)
        .map(|s| (s.id.clone(), compute_totals(&rows_for(&s.id))))
        .collect();

    let mut rankings = serde_json::Map::new();
    for col in AggregateColumn::ALL {
        let peers: Vec<(String, f64)> = peer_totals
            .iter()
            .map(|(id, t)| (id.clone(), t.column(col)))
            .collect();
        let ranking = compute_ranking(&peers, student_id);
        rankings.insert(
            col.as_str().to_string(),
            serde_json::to_value(ranking).unwrap_or(json!(null)),
        );
    }

    let mut lines = Vec::new();
    {
        let mut row_iter = student_rows.iter();
        for section in &sections {
            for subject in &section.subjects {
                // rows_for produced one row per subject in the same order.
                let row = row_iter.next().copied().unwrap_or_default();
                lines.push(json!({
                    "subjectId": subject.id,
                    "subjectName": subject.subject.name,
                    "category": section.category,
                    "maxima": subject.subject.maxima,
                    "scores": row,
                    "sem1Total": row.sem1_total(),
                    "sem2Total": row.sem2_total(),
                    "generalTotal": row.general_total(),
                }));
            }
        }
    }

    Ok(json!({
        "school": school_header(conn),
        "class": {
            "id": class_id,
            "name": class.name,
            "level": class.level,
            "titulaire": class.titulaire,
        },
        "student": {
            "id": student.id,
            "displayName": student.display_name,
            "active": student.active,
        },
        "lines": lines,
        "totals": totals,
        "maxTotals": max_totals,
        "percentages": percentages,
        "rankings": rankings,
    }))
}

fn model_code(model: &serde_json::Value) -> String {
    // The model is assembled in deterministic order, so its serialization is
    // a stable fingerprint of the underlying grades and curriculum.
    let mut hasher = Sha256::new();
    hasher.update(model.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn year_label(conn: &Connection) -> String {
    match db::settings_get_json(conn, "school.info") {
        Ok(Some(v)) => v
            .get("yearLabel")
            .and_then(|y| y.as_str())
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}

fn handle_bulletins_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, student_id) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "studentId"),
    ) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };

    match build_model(conn, &class_id, &student_id) {
        Ok(model) => ok(&req.id, model),
        Err(e) => e.response(&req.id),
    }
}

fn handle_bulletins_seal(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, student_id) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "studentId"),
    ) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };

    let model = match build_model(conn, &class_id, &student_id) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    let code = model_code(&model);
    let year = year_label(conn);
    let seal_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    if let Err(e) = conn.execute(
        "INSERT INTO bulletin_seals(id, class_id, student_id, year_label, code, sealed_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, student_id, year_label) DO UPDATE SET
           code = excluded.code,
           sealed_at = excluded.sealed_at",
        (&seal_id, &class_id, &student_id, &year, &code, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "bulletin_seals" })),
        );
    }

    ok(
        &req.id,
        json!({ "code": code, "yearLabel": year, "sealedAt": now }),
    )
}

fn handle_bulletins_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, student_id, code) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "studentId"),
        str_param(&req.params, "code"),
    ) {
        (Ok(c), Ok(s), Ok(v)) => (c, s, v),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e.response(&req.id),
    };

    let model = match build_model(conn, &class_id, &student_id) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    let current = model_code(&model);
    let valid = current == code;

    // A stored seal that no longer matches the live data means grades moved
    // after the card was issued.
    let year = year_label(conn);
    let stored: Option<String> = match conn
        .query_row(
            "SELECT code FROM bulletin_seals
             WHERE class_id = ? AND student_id = ? AND year_label = ?",
            (&class_id, &student_id, &year),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let stale = stored.as_deref().map(|s| s != current).unwrap_or(false);

    ok(&req.id, json!({ "valid": valid, "stale": stale }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bulletins.model" => Some(handle_bulletins_model(state, req)),
        "bulletins.seal" => Some(handle_bulletins_seal(state, req)),
        "bulletins.verify" => Some(handle_bulletins_verify(state, req)),
        _ => None,
    }
}
