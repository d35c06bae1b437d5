use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

use super::auth;

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let out_path = match super::required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Make sure everything is on disk before the file is copied into the zip.
    let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");

    let export = match backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "uploadCount": export.upload_count,
        }),
    )
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "open a workspace first", None);
    };
    {
        let conn = match super::db_conn(state, req) {
            Ok(c) => c,
            Err(resp) => return resp,
        };
        if let Err(resp) = auth::authenticate(conn, req) {
            return resp;
        }
    }
    let in_path = match super::required_str(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop the open handle before the database file is replaced. Sessions
    // live in the database, so the import also ends the current session.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace) {
        Ok(v) => v,
        Err(e) => {
            // Reopen so the daemon is still usable after a bad bundle.
            state.db = db::open_db(&workspace).ok();
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            // The bundle may carry session rows from export time; a restore
            // always starts logged out.
            let _ = conn.execute("DELETE FROM sessions", []);
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected,
                    "uploadCount": import.upload_count,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
