pub mod artifacts;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

pub use artifacts::ArtifactStore;

/// Open (or create) the artifact database at the given path with schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL keeps readers unblocked while a rebuild commits
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;

    tracing::info!(path = %path.display(), "artifact database initialized");
    Ok(conn)
}

/// Open an in-memory artifact database (tests, throwaway runs).
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    Ok(conn)
}

/// Diagnostics reported by `hsknn doctor`.
#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub schema_version: u32,
    pub embedding_model: Option<String>,
    pub integrity_ok: bool,
    pub integrity_details: String,
    /// `(key, byte_len, updated_at)` for every stored artifact, ordered by key.
    pub artifacts: Vec<(String, u64, String)>,
}

/// Run `PRAGMA integrity_check` and collect artifact sizes.
pub fn check_database_health(conn: &Connection) -> Result<DatabaseHealth> {
    let schema_version = schema::get_schema_version(conn)?;
    let embedding_model = schema::get_embedding_model(conn)?;

    let integrity_details: String =
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let integrity_ok = integrity_details == "ok";

    let mut stmt =
        conn.prepare("SELECT key, byte_len, updated_at FROM artifacts ORDER BY key")?;
    let artifacts = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DatabaseHealth {
        schema_version,
        embedding_model,
        integrity_ok,
        integrity_details,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_passes_on_fresh_db() {
        let conn = open_memory_database().unwrap();
        let report = check_database_health(&conn).unwrap();
        assert!(report.integrity_ok);
        assert_eq!(report.schema_version, schema::SCHEMA_VERSION);
        assert!(report.embedding_model.is_none());
        assert!(report.artifacts.is_empty());
    }
}
