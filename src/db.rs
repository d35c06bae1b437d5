use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const DB_FILE: &str = "roster.sqlite3";
pub const UPLOADS_DIR: &str = "uploads";

pub const DEFAULT_ADMIN_USER: &str = "admin";
pub const DEFAULT_ADMIN_PASS: &str = "743263";
pub const DEFAULT_SECRET_QUESTION: &str = "What is your favorite color?";
pub const DEFAULT_SECRET_ANSWER: &str = "blue";

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    std::fs::create_dir_all(workspace.join(UPLOADS_DIR))?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            student_class TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            guardian_phone TEXT NOT NULL DEFAULT '',
            school TEXT NOT NULL DEFAULT '',
            mock_test1 REAL NOT NULL DEFAULT 0,
            mock_test1_full REAL NOT NULL DEFAULT 0,
            mock_test2 REAL NOT NULL DEFAULT 0,
            mock_test2_full REAL NOT NULL DEFAULT 0,
            mock_test3 REAL NOT NULL DEFAULT 0,
            mock_test3_full REAL NOT NULL DEFAULT 0,
            mock_test4 REAL NOT NULL DEFAULT 0,
            mock_test4_full REAL NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(student_class)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gallery_images(
            filename TEXT PRIMARY KEY,
            added_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials(
            username TEXT PRIMARY KEY,
            password_sha256 TEXT NOT NULL,
            secret_question TEXT NOT NULL,
            secret_answer_sha256 TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(username) REFERENCES credentials(username)
        )",
        [],
    )?;

    // Old workspaces predate per-record timestamps.
    ensure_students_updated_at(&conn)?;

    seed_default_credentials(&conn)?;

    Ok(conn)
}

/// First open of a workspace gets the stock admin account. The row is only
/// ever inserted when the table is empty, so a changed password survives
/// reopening.
fn seed_default_credentials(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM credentials", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO credentials(username, password_sha256, secret_question, secret_answer_sha256)
         VALUES(?, ?, ?, ?)",
        (
            DEFAULT_ADMIN_USER,
            sha256_hex(DEFAULT_ADMIN_PASS),
            DEFAULT_SECRET_QUESTION,
            sha256_hex(DEFAULT_SECRET_ANSWER),
        ),
    )?;
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
