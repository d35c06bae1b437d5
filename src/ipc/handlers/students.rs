use crate::calc::{self, MockTest, StudentRecord, MOCK_TEST_COUNT};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::repo::{RecordStore, SqliteRecords};
use serde_json::json;

use super::auth;

fn required_student_id(req: &Request) -> Result<i64, serde_json::Value> {
    req.params
        .get("studentId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing studentId", None))
}

/// Score fields follow the safe_float contract: anything that is not a
/// number (or a numeric string) lands as 0.0, never as an error.
fn parse_mocks(params: &serde_json::Value) -> [MockTest; MOCK_TEST_COUNT] {
    let mut mocks = [MockTest::default(); MOCK_TEST_COUNT];
    let Some(items) = params.get("mocks").and_then(|v| v.as_array()) else {
        return mocks;
    };
    for (i, mock) in mocks.iter_mut().enumerate() {
        let Some(item) = items.get(i) else {
            break;
        };
        mock.score = calc::coerce_score(item.get("score").unwrap_or(&serde_json::Value::Null));
        mock.out_of = calc::coerce_score(item.get("outOf").unwrap_or(&serde_json::Value::Null));
    }
    mocks
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }

    let students = SqliteRecords::new(conn).load_all();
    ok(&req.id, json!({ "students": students }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }
    let name = match super::required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_class = match super::required_str(req, "studentClass") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mocks = parse_mocks(&req.params);

    let repo = SqliteRecords::new(conn);
    let mut students = repo.load_all();
    // max + 1, so an id is never reissued while a larger one exists.
    let next_id = students.iter().map(|s| s.id).max().unwrap_or(0) + 1;
    students.push(StudentRecord {
        id: next_id,
        name,
        student_class,
        phone: super::optional_str(req, "phone"),
        guardian_phone: super::optional_str(req, "guardianPhone"),
        school: super::optional_str(req, "school"),
        percentage: calc::percentage(&mocks),
        mocks,
    });

    if let Err(e) = repo.save_all(&students) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": next_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }
    let student_id = match required_student_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match super::required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_class = match super::required_str(req, "studentClass") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mocks = parse_mocks(&req.params);

    let repo = SqliteRecords::new(conn);
    let mut students = repo.load_all();
    let Some(record) = students.iter_mut().find(|s| s.id == student_id) else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // Edits overwrite every field together; there is no patch semantics.
    record.name = name;
    record.student_class = student_class;
    record.phone = super::optional_str(req, "phone");
    record.guardian_phone = super::optional_str(req, "guardianPhone");
    record.school = super::optional_str(req, "school");
    record.mocks = mocks;
    record.percentage = calc::percentage(&mocks);

    if let Err(e) = repo.save_all(&students) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }
    let student_id = match required_student_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let repo = SqliteRecords::new(conn);
    let mut students = repo.load_all();
    let before = students.len();
    students.retain(|s| s.id != student_id);
    if students.len() == before {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Err(e) = repo.save_all(&students) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
