use crate::calc::{slot_value_in_bounds, GradeRow, RawSlot, Score};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_row(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Option<GradeRow>, HandlerErr> {
    conn.query_row(
        "SELECT period1, period2, exam1, period3, period4, exam2
         FROM grade_rows
         WHERE student_id = ? AND subject_id = ?",
        (student_id, subject_id),
        |r| {
            Ok(GradeRow {
                period1: r.get::<_, Option<f64>>(0)?.into(),
                period2: r.get::<_, Option<f64>>(1)?.into(),
                exam1: r.get::<_, Option<f64>>(2)?.into(),
                period3: r.get::<_, Option<f64>>(3)?.into(),
                period4: r.get::<_, Option<f64>>(4)?.into(),
                exam2: r.get::<_, Option<f64>>(5)?.into(),
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn upsert_row(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    subject_id: &str,
    row: &GradeRow,
) -> Result<(), HandlerErr> {
    let row_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO grade_rows(id, class_id, student_id, subject_id,
            period1, period2, exam1, period3, period4, exam2, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
           period1 = excluded.period1,
           period2 = excluded.period2,
           exam1 = excluded.exam1,
           period3 = excluded.period3,
           period4 = excluded.period4,
           exam2 = excluded.exam2,
           updated_at = excluded.updated_at",
        rusqlite::params![
            row_id,
            class_id,
            student_id,
            subject_id,
            Option::<f64>::from(row.period1),
            Option::<f64>::from(row.period2),
            Option::<f64>::from(row.exam1),
            Option::<f64>::from(row.period3),
            Option::<f64>::from(row.period4),
            Option::<f64>::from(row.exam2),
            now,
        ],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "grade_rows" }),
        )
    })?;
    Ok(())
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT gr.subject_id, sub.name,
                gr.period1, gr.period2, gr.exam1, gr.period3, gr.period4, gr.exam2
         FROM grade_rows gr
         JOIN subjects sub ON sub.id = gr.subject_id
         WHERE gr.class_id = ? AND gr.student_id = ?
         ORDER BY sub.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&class_id, &student_id), |r| {
            let subject_id: String = r.get(0)?;
            let subject_name: String = r.get(1)?;
            let row = GradeRow {
                period1: r.get::<_, Option<f64>>(2)?.into(),
                period2: r.get::<_, Option<f64>>(3)?.into(),
                exam1: r.get::<_, Option<f64>>(4)?.into(),
                period3: r.get::<_, Option<f64>>(5)?.into(),
                period4: r.get::<_, Option<f64>>(6)?.into(),
                exam2: r.get::<_, Option<f64>>(7)?.into(),
            };
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "scores": row,
                "sem1Total": row.sem1_total(),
                "sem2Total": row.sem2_total(),
                "generalTotal": row.general_total(),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn apply_patch(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    student_id: &str,
    subject_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing patch object"));
    };

    let student_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let Some(maxima) =
        super::curriculum::subject_maxima(conn, subject_id).map_err(HandlerErr::query)?
    else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };

    let mut row = load_row(conn, student_id, subject_id)?.unwrap_or_default();

    let mut touched = 0usize;
    for slot in RawSlot::ALL {
        let Some(value) = patch.get(slot.key()) else {
            continue;
        };
        let score = if value.is_null() {
            Score::Unset
        } else {
            let Some(v) = value.as_f64() else {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    format!("patch.{} must be a number or null", slot.key()),
                    json!({ "slot": slot.key() }),
                ));
            };
            if !slot_value_in_bounds(&maxima, slot, v) {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    format!(
                        "score out of bounds for {} (max {})",
                        slot.key(),
                        slot.bound(&maxima)
                    ),
                    json!({ "slot": slot.key(), "value": v, "max": slot.bound(&maxima) }),
                ));
            }
            Score::Marked(v)
        };
        slot.set(&mut row, score);
        touched += 1;
    }

    if touched == 0 {
        return Err(HandlerErr::new(
            "bad_params",
            "patch must set at least one of period1, period2, exam1, period3, period4, exam2",
        ));
    }

    upsert_row(conn, class_id, student_id, subject_id, &row)?;

    Ok(json!({
        "subjectId": subject_id,
        "scores": row,
        "sem1Total": row.sem1_total(),
        "sem2Total": row.sem2_total(),
        "generalTotal": row.general_total(),
    }))
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, student_id, subject_id) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "studentId"),
        str_param(&req.params, "subjectId"),
    ) {
        (Ok(c), Ok(s), Ok(j)) => (c, s, j),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e.response(&req.id),
    };

    match apply_patch(conn, req, &class_id, &student_id, &subject_id) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        _ => None,
    }
}
