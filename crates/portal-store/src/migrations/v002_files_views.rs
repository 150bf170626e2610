//! v002 -- Uploaded file metadata and content view tracking.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path         TEXT PRIMARY KEY NOT NULL,   -- container-relative blob path
    container    TEXT NOT NULL,
    original_name TEXT NOT NULL,
    content_type TEXT,
    size         INTEGER NOT NULL,
    blake3_hash  TEXT NOT NULL,
    uploaded_by  TEXT,
    created_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS view_events (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    event_type       TEXT NOT NULL,
    lesson_id        TEXT,
    lesson_title     TEXT,
    category         TEXT,
    session_id       TEXT,
    view_duration    REAL,
    message          TEXT,
    user_agent       TEXT,
    client_ip        TEXT,
    client_timestamp TEXT NOT NULL,
    created_date     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_view_events_user ON view_events(user_id, created_date);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
