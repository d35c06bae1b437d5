use crate::db::sha256_hex;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const SESSION_TTL_HOURS: i64 = 24;

/// Identity resolved for one request from its `sessionToken` param. Mutating
/// handlers take this as their proof of authentication; nothing about the
/// admin session lives in process globals.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub username: String,
}

/// All reads and writes of the admin account go through here instead of
/// module constants. Passwords and the secret answer are stored as SHA-256
/// digests only.
pub struct CredentialStore<'a> {
    conn: &'a Connection,
}

impl<'a> CredentialStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn password_digest(&self, username: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT password_sha256 FROM credentials WHERE username = ?",
                [username],
                |r| r.get(0),
            )
            .optional()
    }

    pub fn verify_password(&self, username: &str, password: &str) -> rusqlite::Result<bool> {
        Ok(self
            .password_digest(username)?
            .map(|digest| digest == sha256_hex(password))
            .unwrap_or(false))
    }

    pub fn set_password(&self, username: &str, new_password: &str) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE credentials SET password_sha256 = ? WHERE username = ?",
            (sha256_hex(new_password), username),
        )
    }

    /// The workspace holds a single admin account; recovery operates on it.
    pub fn recovery_row(&self) -> rusqlite::Result<Option<(String, String, String)>> {
        self.conn
            .query_row(
                "SELECT username, secret_question, secret_answer_sha256
                 FROM credentials
                 ORDER BY username
                 LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
    }
}

/// Resolves the request's `sessionToken` to an `AuthContext`, rejecting
/// missing, unknown, and expired tokens with an `unauthorized` error in the
/// wire shape.
pub fn authenticate(conn: &Connection, req: &Request) -> Result<AuthContext, serde_json::Value> {
    let Some(token) = req.params.get("sessionToken").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "unauthorized", "missing sessionToken", None));
    };

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT username, created_at FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((username, created_at)) = row else {
        return Err(err(&req.id, "unauthorized", "invalid session", None));
    };

    let fresh = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| {
            Utc::now().signed_duration_since(t.with_timezone(&Utc))
                < Duration::hours(SESSION_TTL_HOURS)
        })
        .unwrap_or(false);
    if !fresh {
        let _ = conn.execute("DELETE FROM sessions WHERE token = ?", [token]);
        return Err(err(&req.id, "unauthorized", "session expired", None));
    }

    Ok(AuthContext { username })
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let username = match super::required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match super::required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let store = CredentialStore::new(conn);
    match store.verify_password(&username, &password) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "unauthorized",
                "invalid username or password",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let token = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(token, username, created_at) VALUES(?, ?, ?)",
        (&token, &username, Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(&req.id, json!({ "sessionToken": token }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let token = match super::required_str(req, "sessionToken") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Idempotent: logging out an unknown token is still a success.
    if let Err(e) = conn.execute("DELETE FROM sessions WHERE token = ?", [&token]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_change_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let ctx = match authenticate(conn, req) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let old_password = match super::required_str(req, "oldPassword") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new_password = match super::required_str(req, "newPassword") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let store = CredentialStore::new(conn);
    match store.verify_password(&ctx.username, &old_password) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "unauthorized", "old password is incorrect", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = store.set_password(&ctx.username, &new_password) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "credentials" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_recovery_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match CredentialStore::new(conn).recovery_row() {
        Ok(Some((_, question, _))) => ok(&req.id, json!({ "question": question })),
        Ok(None) => err(&req.id, "not_found", "no admin account", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_recover(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match super::db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let answer = match super::required_str(req, "answer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new_password = match super::required_str(req, "newPassword") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let store = CredentialStore::new(conn);
    let (username, _, answer_digest) = match store.recovery_row() {
        Ok(Some(row)) => row,
        Ok(None) => return err(&req.id, "not_found", "no admin account", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Answers compare case-insensitively, like the original form input.
    if sha256_hex(&answer.to_lowercase()) != answer_digest {
        return err(&req.id, "unauthorized", "wrong answer, try again", None);
    }

    if let Err(e) = store.set_password(&username, &new_password) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "credentials" })),
        );
    }
    ok(&req.id, json!({ "ok": true, "username": username }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.changePassword" => Some(handle_change_password(state, req)),
        "auth.recoveryQuestion" => Some(handle_recovery_question(state, req)),
        "auth.recover" => Some(handle_recover(state, req)),
        _ => None,
    }
}
