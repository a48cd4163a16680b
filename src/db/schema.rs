//! SQL DDL for all mnemo tables.
//!
//! Defines the `records`, `records_fts` (FTS5), `records_vec` (vec0),
//! `tracked_files`, and `schema_meta` tables. All DDL uses `IF NOT EXISTS`
//! for idempotent initialization on every startup.

use rusqlite::Connection;

/// All schema DDL statements for mnemo's core tables.
const SCHEMA_SQL: &str = r#"
-- Core record storage
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT NOT NULL CHECK(source IN ('file','conversation','knowledge','session_summary')),
    project_path TEXT,
    file_path TEXT,
    session_id TEXT,
    category TEXT,
    content_hash TEXT,
    chunk_index INTEGER,
    total_chunks INTEGER,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
CREATE INDEX IF NOT EXISTS idx_records_project ON records(project_path);
CREATE INDEX IF NOT EXISTS idx_records_file ON records(file_path);
CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id);
CREATE INDEX IF NOT EXISTS idx_records_hash ON records(content_hash);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    content,
    id UNINDEXED,
    source UNINDEXED,
    content='records',
    content_rowid='rowid'
);

-- Per-file change tracking for the sync pipeline
CREATE TABLE IF NOT EXISTS tracked_files (
    file_path TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracked_project ON tracked_files(project_path);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax), and its
/// dimension is fixed at creation time.
fn vec_table_sql(dimension: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS records_vec USING vec0(\n\
         id TEXT PRIMARY KEY,\n\
         embedding FLOAT[{dimension}]\n\
         );"
    )
}

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection, dimension: usize) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql(dimension))?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('vector_dimension', ?1)",
        [dimension.to_string()],
    )?;

    Ok(())
}
