use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let result = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "743263" }),
    );
    result["sessionToken"]
        .as_str()
        .expect("session token")
        .to_string()
}

fn mocks(scores: [f64; 4], fulls: [f64; 4]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = (0..4)
        .map(|i| json!({ "score": scores[i], "outOf": fulls[i] }))
        .collect();
    json!(items)
}

#[test]
fn crud_assigns_ids_and_derives_percentages() {
    let workspace = temp_dir("rosterd-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.open",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = login(&mut stdin, &mut reader);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "sessionToken": token,
            "name": "Asha Sen",
            "studentClass": "10",
            "phone": "9000000001",
            "guardianPhone": "9000000002",
            "school": "Model School",
            "mocks": mocks([45.0, 40.0, 35.0, 30.0], [50.0, 50.0, 50.0, 50.0]),
        }),
    );
    assert_eq!(created["studentId"], json!(1));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "sessionToken": token,
            "name": "Binoy Das",
            "studentClass": "10",
            // Score fields coerce: numeric strings parse, garbage becomes 0.
            "mocks": json!([
                { "score": "25", "outOf": 50 },
                { "score": "n/a", "outOf": 50 },
                { "score": null, "outOf": 50 },
                { "score": 25, "outOf": 50 }
            ]),
        }),
    );
    assert_eq!(created["studentId"], json!(2));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "sessionToken": token }),
    );
    let students = listed["students"].as_array().expect("students array");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["percentage"], json!(75.0));
    // 25 + 0 + 0 + 25 out of 200.
    assert_eq!(students[1]["percentage"], json!(25.0));

    // Edit overwrites the whole record, and percentage follows the scores.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({
            "sessionToken": token,
            "studentId": 2,
            "name": "Binoy Das",
            "studentClass": "11",
            "school": "City School",
            "mocks": mocks([50.0, 50.0, 50.0, 50.0], [50.0, 50.0, 50.0, 50.0]),
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "sessionToken": token }),
    );
    let students = listed["students"].as_array().expect("students array");
    assert_eq!(students[1]["studentClass"], json!("11"));
    assert_eq!(students[1]["school"], json!("City School"));
    assert_eq!(students[1]["percentage"], json!(100.0));
    // The update kept the id and left the phone fields at their new
    // (empty) values since every field is overwritten together.
    assert_eq!(students[1]["id"], json!(2));
    assert_eq!(students[1]["phone"], json!(""));

    // Ids keep growing from the maximum, so deleting does not recycle one
    // while a larger id exists.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.delete",
        json!({ "sessionToken": token, "studentId": 1 }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({
            "sessionToken": token,
            "name": "Chitra Roy",
            "studentClass": "10",
            "mocks": mocks([0.0; 4], [0.0; 4]),
        }),
    );
    assert_eq!(created["studentId"], json!(3));

    // Zero full marks define percentage as 0 rather than failing.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "sessionToken": token }),
    );
    let students = listed["students"].as_array().expect("students array");
    assert_eq!(students.len(), 2);
    assert_eq!(students[1]["name"], json!("Chitra Roy"));
    assert_eq!(students[1]["percentage"], json!(0.0));

    child.kill().ok();
}

#[test]
fn unknown_ids_report_not_found() {
    let workspace = temp_dir("rosterd-crud-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.open",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = login(&mut stdin, &mut reader);

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({
            "sessionToken": token,
            "studentId": 99,
            "name": "Nobody",
            "studentClass": "10",
        }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.delete",
        json!({ "sessionToken": token, "studentId": 99 }),
    );
    assert_eq!(error_code(&resp), "not_found");

    child.kill().ok();
}
