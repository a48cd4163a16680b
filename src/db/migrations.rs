//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the vector dimension the database was created with, if recorded.
pub fn get_vector_dimension(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'vector_dimension'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(val.parse::<usize>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        schema_version = version,
        target = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        if !apply_migration(conn, next)? {
            break;
        }
        update_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Apply one migration step. Returns false for unknown targets.
fn apply_migration(conn: &Connection, target: u32) -> rusqlite::Result<bool> {
    let _ = conn;
    match target {
        // future migrations slot in here, one arm per version
        _ => {
            tracing::error!(version = target, "unknown migration target");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn, 384).unwrap();
        conn
    }

    #[test]
    fn get_schema_version_returns_1_on_fresh_db() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn vector_dimension_is_readable() {
        let conn = test_db();
        assert_eq!(get_vector_dimension(&conn).unwrap(), Some(384));
    }
}
