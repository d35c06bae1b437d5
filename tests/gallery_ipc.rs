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

#[test]
fn gallery_add_list_remove() {
    let workspace = temp_dir("rosterd-gallery");
    let staging = temp_dir("rosterd-gallery-src");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.open",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "743263" }),
    );
    let token = login["sessionToken"].as_str().expect("token").to_string();

    // Names with spaces and shell-ish characters get flattened to a safe
    // file name on the way in.
    let src = staging.join("school fair (2).png");
    std::fs::write(&src, b"not-really-a-png").expect("write source image");
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gallery.add",
        json!({ "sessionToken": token, "sourcePath": src.to_string_lossy() }),
    );
    assert_eq!(added["filename"], json!("school_fair__2_.png"));
    assert!(workspace.join("uploads/school_fair__2_.png").is_file());

    // Re-adding the same name keeps a single gallery row.
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gallery.add",
        json!({ "sessionToken": token, "sourcePath": src.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "3", "gallery.list", json!({}));
    let images = listed["images"].as_array().expect("images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["filename"], json!("school_fair__2_.png"));

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gallery.remove",
        json!({ "sessionToken": token, "filename": "school_fair__2_.png" }),
    );
    assert!(!workspace.join("uploads/school_fair__2_.png").exists());
    let listed = request_ok(&mut stdin, &mut reader, "5", "gallery.list", json!({}));
    assert_eq!(listed["images"], json!([]));

    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "gallery.remove",
        json!({ "sessionToken": token, "filename": "never-added.png" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    child.kill().ok();
}

#[test]
fn gallery_rejects_disallowed_types_and_anonymous_writes() {
    let workspace = temp_dir("rosterd-gallery-reject");
    let staging = temp_dir("rosterd-gallery-reject-src");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.open",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "743263" }),
    );
    let token = login["sessionToken"].as_str().expect("token").to_string();

    let bad = staging.join("payload.exe");
    std::fs::write(&bad, b"MZ").expect("write source file");
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "gallery.add",
        json!({ "sessionToken": token, "sourcePath": bad.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let img = staging.join("ok.gif");
    std::fs::write(&img, b"GIF89a").expect("write source image");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "gallery.add",
        json!({ "sourcePath": img.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "unauthorized");

    // Listing is public; nothing got in.
    let listed = request_ok(&mut stdin, &mut reader, "3", "gallery.list", json!({}));
    assert_eq!(listed["images"], json!([]));

    child.kill().ok();
}
