use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradecalc.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    // Workspaces created before settings were timestamped lack updated_at.
    ensure_settings_updated_at(&conn)?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO settings(key, value_json, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value_json = excluded.value_json,
           updated_at = excluded.updated_at",
        (key, raw, now),
    )?;
    Ok(())
}

pub fn settings_updated_at(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let at: Option<Option<String>> = conn
        .query_row(
            "SELECT updated_at FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(at.flatten())
}

/// Returns true when a row was removed.
pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(n > 0)
}

fn ensure_settings_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "settings", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE settings ADD COLUMN updated_at TEXT", [])?;
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
