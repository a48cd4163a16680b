pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the mnemo database at the given path, with the vec
/// extension loaded and schema initialized for `dimension`-wide vectors.
///
/// Refuses to open a database that was created with a different dimension —
/// vectors of mixed widths in one store are never valid.
pub fn open_database(path: impl AsRef<Path>, dimension: usize) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::init_schema(&conn, dimension).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    if let Some(stored) = migrations::get_vector_dimension(&conn)? {
        anyhow::ensure!(
            stored == dimension,
            "database at {} was created with dimension {stored}, configured {dimension}",
            path.display()
        );
    }

    tracing::info!(path = %path.display(), dimension, "database initialized");
    Ok(conn)
}

/// Open an in-memory database for testing.
pub fn open_memory_database(dimension: usize) -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    schema::init_schema(&conn, dimension).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}
