use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use directories::ProjectDirs;
use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// String blobs keyed by `(scope, key)`. The scope is the owning user's id.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, scope: &str, key: &str, value: &str) -> Result<()>;
    fn remove(&self, scope: &str, key: &str) -> Result<()>;
    /// Drop every key under `scope`.
    fn clear_scope(&self, scope: &str) -> Result<()>;
}

/// Read and decode a JSON blob. A blob that fails to decode is logged and treated as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, scope: &str, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(scope, key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("discarding malformed entry {scope}/{key}: {e}");
            Ok(None)
        }
    }
}

pub fn write_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, scope: &str, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(scope, key, &raw)
}

pub fn default_db_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("com", "redweb", "RedWeb").ok_or(Error::NoDataDir)?;
    Ok(proj.data_dir().join("redweb.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_dir(path)?;
        debug!("opening store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS kv (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, key)
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE scope = ?1 AND key = ?2")?;
        let value = stmt.query_row(params![scope, key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        debug!("write {scope}/{key} ({} bytes)", value.len());
        self.conn.lock().execute(
            r#"
            INSERT INTO kv (scope, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(scope, key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at
            "#,
            params![scope, key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, scope: &str, key: &str) -> Result<()> {
        self.conn.lock().execute("DELETE FROM kv WHERE scope = ?1 AND key = ?2", params![scope, key])?;
        Ok(())
    }

    fn clear_scope(&self, scope: &str) -> Result<()> {
        let removed = self.conn.lock().execute("DELETE FROM kv WHERE scope = ?1", params![scope])?;
        debug!("cleared {removed} entries for {scope}");
        Ok(())
    }
}

/// Volatile store, handy for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(&(scope.to_string(), key.to_string())).cloned())
    }

    fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert((scope.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, scope: &str, key: &str) -> Result<()> {
        self.entries.lock().remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }

    fn clear_scope(&self, scope: &str) -> Result<()> {
        self.entries.lock().retain(|(s, _), _| s != scope);
        Ok(())
    }
}
