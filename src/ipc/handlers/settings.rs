use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const SCHOOL_INFO_KEY: &str = "school.info";

fn handle_school_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let current = db::settings_get_json(conn, SCHOOL_INFO_KEY)
        .ok()
        .flatten()
        .unwrap_or_else(|| json!({}));
    let mut merged = current.as_object().cloned().unwrap_or_default();

    for field in ["name", "yearLabel"] {
        let Some(value) = req.params.get(field) else {
            continue;
        };
        if value.is_null() {
            merged.remove(field);
            continue;
        }
        let Some(text) = value.as_str() else {
            return err(
                &req.id,
                "bad_params",
                format!("{} must be a string or null", field),
                None,
            );
        };
        merged.insert(field.to_string(), json!(text.trim()));
    }

    let value = serde_json::Value::Object(merged);
    if let Err(e) = db::settings_set_json(conn, SCHOOL_INFO_KEY, &value) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, value)
}

fn handle_school_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::settings_get_json(conn, SCHOOL_INFO_KEY) {
        Ok(Some(v)) => ok(&req.id, v),
        Ok(None) => ok(&req.id, json!({})),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.set" => Some(handle_school_set(state, req)),
        "school.get" => Some(handle_school_get(state, req)),
        _ => None,
    }
}
