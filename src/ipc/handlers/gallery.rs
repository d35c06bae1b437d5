use crate::db::UPLOADS_DIR;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::Path;

use super::auth;

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Strips any directory component and maps everything outside
/// `[A-Za-z0-9._-]` to underscores. Upload names come from the caller and
/// must never be able to escape the uploads folder.
pub(super) fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

fn allowed_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty() && ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn
        .prepare("SELECT filename, added_at FROM gallery_images ORDER BY added_at, filename")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let filename: String = r.get(0)?;
            let added_at: String = r.get(1)?;
            Ok(json!({ "filename": filename, "addedAt": added_at }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(images) => ok(&req.id, json!({ "images": images })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "open a workspace first", None);
    };
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }
    let source_path = match super::required_str(req, "sourcePath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let src = Path::new(&source_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "source file not found",
            Some(json!({ "path": source_path })),
        );
    }

    let filename = sanitize_filename(&source_path);
    if !allowed_file(&filename) {
        return err(
            &req.id,
            "bad_params",
            "file type not allowed",
            Some(json!({ "allowed": ALLOWED_EXTENSIONS })),
        );
    }

    let uploads = workspace.join(UPLOADS_DIR);
    if let Err(e) = std::fs::create_dir_all(&uploads) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }
    if let Err(e) = std::fs::copy(src, uploads.join(&filename)) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": source_path })),
        );
    }

    // Re-adding a name overwrites the file and keeps a single row.
    if let Err(e) = conn.execute(
        "INSERT INTO gallery_images(filename, added_at) VALUES(?, ?)
         ON CONFLICT(filename) DO UPDATE SET added_at = excluded.added_at",
        (&filename, chrono::Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "gallery_images" })),
        );
    }

    ok(&req.id, json!({ "filename": filename }))
}

fn handle_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "open a workspace first", None);
    };
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = auth::authenticate(conn, req) {
        return resp;
    }
    let filename = match super::required_str(req, "filename") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let deleted = match conn.execute("DELETE FROM gallery_images WHERE filename = ?", [&filename])
    {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "gallery_images" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "image not in gallery", None);
    }

    // The row is authoritative; a missing file on disk is not an error.
    let file_path = workspace.join(UPLOADS_DIR).join(sanitize_filename(&filename));
    if file_path.is_file() {
        let _ = std::fs::remove_file(&file_path);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gallery.list" => Some(handle_list(state, req)),
        "gallery.add" => Some(handle_add(state, req)),
        "gallery.remove" => Some(handle_remove(state, req)),
        _ => None,
    }
}
