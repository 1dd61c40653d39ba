use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include roster counts so a dashboard can render without extra calls.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.level,
           c.titulaire,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM devoirs d WHERE d.class_id = c.id) AS devoir_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let level: String = row.get(2)?;
            let titulaire: Option<String> = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            let devoir_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "level": level,
                "titulaire": titulaire,
                "studentCount": student_count,
                "devoirCount": devoir_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let level = match req.params.get("level").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing level", None),
    };
    if level.is_empty() {
        return err(&req.id, "bad_params", "level must not be empty", None);
    }
    let titulaire = req
        .params
        .get("titulaire")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, level, titulaire) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &level, &titulaire),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "level": level }),
    )
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let mut updated = 0usize;
    for (field, column) in [
        ("name", "name"),
        ("level", "level"),
        ("titulaire", "titulaire"),
    ] {
        let Some(value) = patch.get(field) else {
            continue;
        };
        let text = match value.as_str() {
            Some(v) => Some(v.trim().to_string()),
            None if value.is_null() && field == "titulaire" => None,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", field),
                    None,
                )
            }
        };
        if field != "titulaire" && text.as_deref().map(|t| t.is_empty()).unwrap_or(true) {
            return err(
                &req.id,
                "bad_params",
                format!("patch.{} must not be empty", field),
                None,
            );
        }
        let sql = format!("UPDATE classes SET {} = ? WHERE id = ?", column);
        if let Err(e) = conn.execute(&sql, (&text, &class_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }

    ok(&req.id, json!({ "classId": class_id, "updated": updated }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 7] = [
        (
            "devoir_scores",
            "DELETE FROM devoir_scores
             WHERE devoir_id IN (SELECT id FROM devoirs WHERE class_id = ?)",
        ),
        ("devoirs", "DELETE FROM devoirs WHERE class_id = ?"),
        ("grade_rows", "DELETE FROM grade_rows WHERE class_id = ?"),
        (
            "timetable_slots",
            "DELETE FROM timetable_slots WHERE class_id = ?",
        ),
        (
            "bulletin_seals",
            "DELETE FROM bulletin_seals WHERE class_id = ?",
        ),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
