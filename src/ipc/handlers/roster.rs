use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::repo::{RecordStore, SqliteRecords};
use serde_json::json;

/// Public roster listing: search + class filter, then dense ranking over
/// whatever subset survived. Ranks are scoped to the filtered view on
/// purpose; the same student ranks differently under a different filter.
fn handle_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let class_filter = req
        .params
        .get("classFilter")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "All");

    let all = SqliteRecords::new(conn).load_all();

    let mut scoped: Vec<_> = all.clone();
    if !query.is_empty() {
        scoped.retain(|s| {
            s.name.to_lowercase().contains(&query)
                || s.phone.to_lowercase().contains(&query)
                || s.guardian_phone.to_lowercase().contains(&query)
        });
    }
    if let Some(ref class) = class_filter {
        scoped.retain(|s| &s.student_class == class);
    }

    let ranked = calc::rank_by_percentage(scoped);
    let students: Vec<serde_json::Value> = ranked
        .iter()
        .map(|r| {
            let mut entry = match serde_json::to_value(r) {
                Ok(v) => v,
                Err(_) => json!({}),
            };
            // The listing keeps a stable serial number per student (the id),
            // independent of the rank-ordered row position.
            entry["serialNo"] = json!(r.student.id);
            entry
        })
        .collect();

    // Dropdown values come from the unfiltered roster so narrowing a filter
    // never empties the controls.
    let mut classes: Vec<String> = all.iter().map(|s| s.student_class.clone()).collect();
    classes.sort_by(|a, b| calc::compare_class_labels(a, b));
    classes.dedup();
    let mut schools: Vec<String> = all.iter().map(|s| s.school.clone()).collect();
    schools.sort();
    schools.dedup();

    ok(
        &req.id,
        json!({
            "students": students,
            "classes": classes,
            "schools": schools,
            "query": query,
            "classFilter": class_filter,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.view" => Some(handle_view(state, req)),
        _ => None,
    }
}
