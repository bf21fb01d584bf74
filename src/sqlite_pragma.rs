//! Shared SQLite PRAGMA setup for every connection the collector opens.

use rusqlite::Connection;

/// Pages between automatic WAL checkpoints.
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

const OPTIMIZED_PRAGMAS: &[(&str, &str)] = &[
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
    ("temp_store", "MEMORY"),
    ("mmap_size", "268435456"),
    ("cache_size", "-64000"),
    ("busy_timeout", "5000"),
];

/// Apply WAL journaling, NORMAL sync, in-memory temp store, mmap, page cache,
/// busy timeout and autocheckpoint settings.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    for (pragma, value) in OPTIMIZED_PRAGMAS {
        set_pragma(conn, pragma, value)?;
    }
    set_pragma(conn, "wal_autocheckpoint", &WAL_AUTOCHECKPOINT_PAGES.to_string())
}

// some pragmas echo the new value as a row, others return nothing
fn set_pragma(conn: &Connection, pragma: &str, value: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA {} = {}", pragma, value))?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}
