use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypto::canonical;

use super::{Snapshot, StateStore};

/// Alternate snapshot backend storing the same canonical JSON blob
/// SwapMesh would otherwise write to disk, but inside a single-row
/// SQLite table. Useful where the deployment already standardizes on
/// SQLite for operational tooling; the schema is intentionally a
/// key-value store, not a relational model of the domain.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating sqlite store dir {}", parent.display()))?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("opening sqlite store at {}", path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshot (id INTEGER PRIMARY KEY CHECK (id = 0), data TEXT NOT NULL)",
            [],
        )
        .context("creating snapshot table")?;
        Ok(SqliteStateStore { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite store")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshot (id INTEGER PRIMARY KEY CHECK (id = 0), data TEXT NOT NULL)",
            [],
        )
        .context("creating snapshot table")?;
        Ok(SqliteStateStore { conn: Mutex::new(conn) })
    }
}

impl StateStore for SqliteStateStore {
    fn load(&self) -> Result<Snapshot> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let data: Option<String> = conn
            .query_row("SELECT data FROM snapshot WHERE id = 0", [], |row| row.get(0))
            .ok();
        match data {
            Some(json) => serde_json::from_str(&json).context("parsing sqlite snapshot blob"),
            None => Ok(Snapshot::default()),
        }
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let value = serde_json::to_value(snapshot).context("serializing snapshot")?;
        let canonical_json = canonical::to_canonical_string(&value);
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute(
            "INSERT INTO snapshot (id, data) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![canonical_json],
        )
        .context("writing sqlite snapshot blob")?;
        Ok(())
    }
}
