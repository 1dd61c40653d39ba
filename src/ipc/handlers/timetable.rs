use crate::ipc::error::{err, ok};
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};
use crate::timetable::{generate_slots, SlotPlan};
use chrono::NaiveTime;
use serde_json::json;

const MAX_SLOTS_PER_DAY: i64 = 24;
const MAX_MINUTES: i64 = 24 * 60;

fn handle_timetable_generate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let day_start_raw = match str_param(&req.params, "dayStart") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Ok(day_start) = NaiveTime::parse_from_str(&day_start_raw, "%H:%M") else {
        return err(
            &req.id,
            "bad_params",
            "dayStart must be HH:MM",
            Some(json!({ "dayStart": day_start_raw })),
        );
    };

    let slot_minutes = req
        .params
        .get("slotMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let slot_count = req
        .params
        .get("slotCount")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if slot_minutes <= 0 || slot_count <= 0 {
        return err(
            &req.id,
            "bad_params",
            "slotMinutes and slotCount must be > 0",
            Some(json!({ "slotMinutes": slot_minutes, "slotCount": slot_count })),
        );
    }
    if slot_count > MAX_SLOTS_PER_DAY {
        return err(
            &req.id,
            "bad_params",
            format!("slotCount exceeds limit of {}", MAX_SLOTS_PER_DAY),
            Some(json!({ "slotCount": slot_count })),
        );
    }
    if slot_minutes > MAX_MINUTES {
        return err(
            &req.id,
            "bad_params",
            format!("slotMinutes exceeds limit of {}", MAX_MINUTES),
            Some(json!({ "slotMinutes": slot_minutes })),
        );
    }

    let break_after = req
        .params
        .get("breakAfter")
        .and_then(|v| v.as_i64())
        .filter(|v| *v > 0)
        .map(|v| v as usize);
    let break_minutes = req
        .params
        .get("breakMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);
    if break_minutes > MAX_MINUTES {
        return err(
            &req.id,
            "bad_params",
            format!("breakMinutes exceeds limit of {}", MAX_MINUTES),
            Some(json!({ "breakMinutes": break_minutes })),
        );
    }

    let slots = generate_slots(
        day_start,
        &SlotPlan {
            slot_minutes,
            slot_count: slot_count as usize,
            break_after,
            break_minutes,
        },
    );
    ok(&req.id, json!({ "slots": slots }))
}

fn handle_timetable_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (class_id, day) = match (
        str_param(&req.params, "classId"),
        str_param(&req.params, "day"),
    ) {
        (Ok(c), Ok(d)) => (c, d),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    if day.trim().is_empty() {
        return err(&req.id, "bad_params", "day must not be empty", None);
    }
    let Some(slots) = req.params.get("slots").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing slots array", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM timetable_slots WHERE class_id = ? AND day = ?",
        (&class_id, &day),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    for (i, slot) in slots.iter().enumerate() {
        let slot_index = slot
            .get("slotIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(i as i64);
        let (Some(starts_at), Some(ends_at)) = (
            slot.get("startsAt").and_then(|v| v.as_str()),
            slot.get("endsAt").and_then(|v| v.as_str()),
        ) else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                "each slot needs startsAt and endsAt",
                Some(json!({ "index": i })),
            );
        };
        let subject_name = slot.get("subjectName").and_then(|v| v.as_str());
        let teacher = slot.get("teacher").and_then(|v| v.as_str());
        if let Err(e) = tx.execute(
            "INSERT INTO timetable_slots(class_id, day, slot_index, starts_at, ends_at,
                                         subject_name, teacher)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &class_id,
                &day,
                slot_index,
                starts_at,
                ends_at,
                subject_name,
                teacher,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "timetable_slots", "index": i })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "day": day, "slotCount": slots.len() }))
}

fn handle_timetable_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match str_param(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT day, slot_index, starts_at, ends_at, subject_name, teacher
         FROM timetable_slots
         WHERE class_id = ?
         ORDER BY day, slot_index",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |r| {
            let day: String = r.get(0)?;
            let slot_index: i64 = r.get(1)?;
            let starts_at: String = r.get(2)?;
            let ends_at: String = r.get(3)?;
            let subject_name: Option<String> = r.get(4)?;
            let teacher: Option<String> = r.get(5)?;
            Ok((
                day,
                json!({
                    "slotIndex": slot_index,
                    "startsAt": starts_at,
                    "endsAt": ends_at,
                    "subjectName": subject_name,
                    "teacher": teacher,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Group into per-day blocks, preserving query order.
    let mut days: Vec<(String, Vec<serde_json::Value>)> = Vec::new();
    for (day, slot) in rows {
        match days.last_mut() {
            Some((d, slots)) if *d == day => slots.push(slot),
            _ => days.push((day, vec![slot])),
        }
    }
    let grid: Vec<serde_json::Value> = days
        .into_iter()
        .map(|(day, slots)| json!({ "day": day, "slots": slots }))
        .collect();

    ok(&req.id, json!({ "days": grid }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.generate" => Some(handle_timetable_generate(state, req)),
        "timetable.save" => Some(handle_timetable_save(state, req)),
        "timetable.get" => Some(handle_timetable_get(state, req)),
        _ => None,
    }
}
