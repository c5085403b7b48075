//! Byte-level artifact cache over SQLite.
//!
//! Every artifact is an opaque blob under a string key. [`ArtifactStore::put_all`]
//! writes a group of keys in one transaction so a bundle is either fully replaced
//! or left untouched.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{check_database_health, schema, DatabaseHealth};

pub struct ArtifactStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl ArtifactStore {
    /// Open the on-disk store, creating the database if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = super::open_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(super::open_memory_database()?),
            path: None,
        })
    }

    /// Database file location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("artifact db lock poisoned: {e}"))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT bytes FROM artifacts WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .with_context(|| format!("failed to read artifact {key}"))
    }

    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.put_all(&[(key, bytes)])
    }

    /// Replace every listed key in a single transaction.
    pub fn put_all(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        for (key, bytes) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO artifacts (key, bytes, byte_len, updated_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, bytes, bytes.len() as i64, now],
            )
            .with_context(|| format!("failed to write artifact {key}"))?;
        }

        tx.commit().context("failed to commit artifact bundle")?;
        tracing::debug!(keys = entries.len(), "artifacts written");
        Ok(())
    }

    /// Drop every stored artifact. The next load rebuilds from scratch.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM artifacts", [])?;
        tracing::info!(removed, "artifact store cleared");
        Ok(removed)
    }

    pub fn embedding_model(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(schema::get_embedding_model(&conn)?)
    }

    pub fn set_embedding_model(&self, model: &str) -> Result<()> {
        let conn = self.lock()?;
        schema::set_embedding_model(&conn, model)?;
        Ok(())
    }

    pub fn health(&self) -> Result<DatabaseHealth> {
        let conn = self.lock()?;
        check_database_health(&conn)
    }
}
