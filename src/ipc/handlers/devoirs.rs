use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str_param, str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const KIND_FREE_TEXT: &str = "free_text";
const KIND_MULTIPLE_CHOICE: &str = "multiple_choice";

struct DevoirRow {
    class_id: String,
    max_points: f64,
}

fn load_devoir(conn: &Connection, devoir_id: &str) -> Result<DevoirRow, HandlerErr> {
    let row: Option<DevoirRow> = conn
        .query_row(
            "SELECT class_id, max_points FROM devoirs WHERE id = ?",
            [devoir_id],
            |r| {
                Ok(DevoirRow {
                    class_id: r.get(0)?,
                    max_points: r.get(1)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    row.ok_or_else(|| HandlerErr::new("not_found", "devoir not found"))
}

fn handle_devoirs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, subject_name, title, kind) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "subjectName"),
        str_param(&req.params, "title"),
        str_param(&req.params, "kind"),
    ) {
        (Ok(c), Ok(s), Ok(t), Ok(k)) => (c, s, t, k),
        (Err(e), _, _, _) | (_, Err(e), _, _) | (_, _, Err(e), _) | (_, _, _, Err(e)) => {
            return e.response(&req.id)
        }
    };
    if kind != KIND_FREE_TEXT && kind != KIND_MULTIPLE_CHOICE {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: free_text, multiple_choice",
            Some(json!({ "kind": kind })),
        );
    }
    let max_points = match req.params.get("maxPoints").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 && v.is_finite() => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "maxPoints must be > 0",
                Some(json!({ "maxPoints": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing maxPoints", None),
    };
    let due_date = opt_str_param(&req.params, "dueDate");

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let devoir_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO devoirs(id, class_id, subject_name, title, kind, max_points, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &devoir_id,
            &class_id,
            subject_name.trim(),
            title.trim(),
            &kind,
            max_points,
            &due_date,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "devoirs" })),
        );
    }

    ok(&req.id, json!({ "devoirId": devoir_id }))
}

fn handle_devoirs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match str_param(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT d.id, d.subject_name, d.title, d.kind, d.max_points, d.due_date, d.created_at,
                (SELECT COUNT(*) FROM devoir_scores ds
                 WHERE ds.devoir_id = d.id AND ds.status = 'graded') AS graded_count
         FROM devoirs d
         WHERE d.class_id = ?
         ORDER BY d.created_at, d.title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let subject_name: String = r.get(1)?;
            let title: String = r.get(2)?;
            let kind: String = r.get(3)?;
            let max_points: f64 = r.get(4)?;
            let due_date: Option<String> = r.get(5)?;
            let created_at: String = r.get(6)?;
            let graded_count: i64 = r.get(7)?;
            Ok(json!({
                "id": id,
                "subjectName": subject_name,
                "title": title,
                "kind": kind,
                "maxPoints": max_points,
                "dueDate": due_date,
                "createdAt": created_at,
                "gradedCount": graded_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(devoirs) => ok(&req.id, json!({ "devoirs": devoirs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_devoirs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let devoir_id = match str_param(&req.params, "devoirId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = load_devoir(conn, &devoir_id) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        (
            "devoir_scores",
            "DELETE FROM devoir_scores WHERE devoir_id = ?",
        ),
        ("devoirs", "DELETE FROM devoirs WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&devoir_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_devoirs_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (devoir_id, student_id) = match (
        str_param(&req.params, "devoirId"),
        str_param(&req.params, "studentId"),
    ) {
        (Ok(d), Ok(s)) => (d, s),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };

    let devoir = match load_devoir(conn, &devoir_id) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };

    let student_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &devoir.class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found in devoir class", None);
    }

    // null clears the mark back to pending.
    let points = match req.params.get("points") {
        None => return err(&req.id, "bad_params", "missing points (number or null)", None),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(p) if p.is_finite() && p >= 0.0 && p <= devoir.max_points => Some(p),
            Some(p) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("points out of bounds (max {})", devoir.max_points),
                    Some(json!({ "points": p, "maxPoints": devoir.max_points })),
                )
            }
            None => return err(&req.id, "bad_params", "points must be a number or null", None),
        },
    };
    let status = if points.is_some() { "graded" } else { "pending" };
    let remark = opt_str_param(&req.params, "remark");

    let score_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO devoir_scores(id, devoir_id, student_id, points, status, remark)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(devoir_id, student_id) DO UPDATE SET
           points = excluded.points,
           status = excluded.status,
           remark = excluded.remark",
        (&score_id, &devoir_id, &student_id, points, status, &remark),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "devoir_scores" })),
        );
    }

    ok(
        &req.id,
        json!({ "devoirId": devoir_id, "studentId": student_id, "status": status }),
    )
}

fn handle_devoirs_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let devoir_id = match str_param(&req.params, "devoirId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let devoir = match load_devoir(conn, &devoir_id) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, ds.points, ds.status, ds.remark
         FROM students s
         LEFT JOIN devoir_scores ds ON ds.student_id = s.id AND ds.devoir_id = ?
         WHERE s.class_id = ? AND s.active = 1
         ORDER BY s.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Result<Vec<(serde_json::Value, Option<f64>)>, _> = stmt
        .query_map((&devoir_id, &devoir.class_id), |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let points: Option<f64> = r.get(3)?;
            let status: Option<String> = r.get(4)?;
            let remark: Option<String> = r.get(5)?;
            let entry = json!({
                "studentId": id,
                "displayName": format!("{}, {}", last, first),
                "points": points,
                "status": status.unwrap_or_else(|| "pending".to_string()),
                "remark": remark,
            });
            Ok((entry, points))
        })
        .and_then(|it| it.collect());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let graded: Vec<f64> = rows.iter().filter_map(|(_, p)| *p).collect();
    let avg_points = if graded.is_empty() {
        0.0
    } else {
        graded.iter().sum::<f64>() / graded.len() as f64
    };
    let avg_percent = if devoir.max_points > 0.0 {
        100.0 * avg_points / devoir.max_points
    } else {
        0.0
    };

    let entries: Vec<serde_json::Value> = rows.into_iter().map(|(entry, _)| entry).collect();
    ok(
        &req.id,
        json!({
            "results": entries,
            "gradedCount": graded.len(),
            "avgPoints": avg_points,
            "avgPercent": avg_percent,
            "maxPoints": devoir.max_points,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "devoirs.create" => Some(handle_devoirs_create(state, req)),
        "devoirs.list" => Some(handle_devoirs_list(state, req)),
        "devoirs.delete" => Some(handle_devoirs_delete(state, req)),
        "devoirs.grade" => Some(handle_devoirs_grade(state, req)),
        "devoirs.results" => Some(handle_devoirs_results(state, req)),
        _ => None,
    }
}
