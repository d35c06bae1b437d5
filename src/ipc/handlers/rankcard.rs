use crate::calc::{self, RankedStudent, StudentRecord};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::repo::{RecordStore, SqliteRecords};
use serde_json::json;
use std::path::PathBuf;

use super::gallery;

const EXPORTS_DIR: &str = "exports";

/// Ranks the target student against their own class only. The global roster
/// view ranks a different scope; the two need not agree and that is by
/// design.
fn class_scoped_rank(all: Vec<StudentRecord>, student_id: i64) -> Option<(RankedStudent, usize)> {
    let target = all.iter().find(|s| s.id == student_id)?.clone();
    let classmates: Vec<StudentRecord> = all
        .into_iter()
        .filter(|s| s.student_class == target.student_class)
        .collect();
    let class_size = classmates.len();
    calc::rank_by_percentage(classmates)
        .into_iter()
        .find(|r| r.student.id == student_id)
        .map(|r| (r, class_size))
}

/// The exact shape handed to the export collaborator: annotated record,
/// scoped rank, podium decoration, and the per-test lines. Drawing the PDF
/// is the consumer's job.
fn card_model(ranked: &RankedStudent, class_size: usize) -> serde_json::Value {
    let student = &ranked.student;
    let mock_tests: Vec<serde_json::Value> = student
        .mocks
        .iter()
        .enumerate()
        .map(|(i, m)| {
            json!({
                "index": i + 1,
                "score": m.score,
                "outOf": m.out_of,
            })
        })
        .collect();

    json!({
        "title": "Student Rank Card",
        "student": student,
        "percentage": student.percentage,
        "rank": ranked.rank,
        "badge": calc::rank_badge(ranked.rank),
        "classSize": class_size,
        "mockTests": mock_tests,
    })
}

fn handle_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let all = SqliteRecords::new(conn).load_all();
    let Some((ranked, class_size)) = class_scoped_rank(all, student_id) else {
        return err(&req.id, "not_found", "student not found", None);
    };

    ok(&req.id, card_model(&ranked, class_size))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = state.workspace.clone();
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let all = SqliteRecords::new(conn).load_all();
    let Some((ranked, class_size)) = class_scoped_rank(all, student_id) else {
        return err(&req.id, "not_found", "student not found", None);
    };
    let model = card_model(&ranked, class_size);

    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
        _ => {
            let Some(workspace) = workspace else {
                return err(&req.id, "no_workspace", "open a workspace first", None);
            };
            let name = gallery::sanitize_filename(&ranked.student.name);
            workspace
                .join(EXPORTS_DIR)
                .join(format!("RankCard_{}.json", name))
        }
    };

    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    }
    let body = match serde_json::to_string_pretty(&model) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&out_path, body) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path.to_string_lossy() })),
        );
    }

    ok(
        &req.id,
        json!({ "outPath": out_path.to_string_lossy(), "rank": ranked.rank }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankcard.model" => Some(handle_model(state, req)),
        "rankcard.export" => Some(handle_export(state, req)),
        _ => None,
    }
}
