use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::SecondsFormat;
use rusqlite::{Connection, TransactionBehavior, params};

use super::PushEvent;
use crate::errors::SyncError;
use crate::sync_config::STATE_DIR;

const SCHEMA_VERSION: i32 = 1;
pub const QUEUE_FILE: &str = "push-queue.db";

/// Location of the queue file inside a build workspace.
pub fn queue_file(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join(QUEUE_FILE)
}

/// Ordered, crash-safe list of pending push events.
///
/// Backed by a SQLite file in rollback-journal mode with `synchronous = FULL`,
/// so a committed transaction survives a crash and an uncommitted one is
/// rolled back on the next open. Single writer only: two processes appending
/// to the same file concurrently is not supported.
pub struct PushQueueStore {
    conn: Connection,
    path: PathBuf,
}

impl PushQueueStore {
    /// Open (or create) the queue file at `path`.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| corruption(path, e))?;
        }
        let conn = Connection::open(path).map_err(|e| corruption(path, e))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), SyncError> {
        let check: String = self
            .conn
            .pragma_query_value(None, "quick_check", |row| row.get(0))
            .map_err(|e| self.corrupt(e))?;
        if check != "ok" {
            return Err(self.corrupt(format!("integrity check failed: {}", check)));
        }

        self.conn
            .pragma_update(None, "synchronous", "FULL")
            .map_err(|e| self.corrupt(e))?;

        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| self.corrupt(e))?;
        if version > SCHEMA_VERSION {
            return Err(self.corrupt(format!(
                "schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS push_queue (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    payload TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| self.corrupt(e))?;

        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| self.corrupt(e))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside one write transaction. The transaction commits only if
    /// `f` returns `Ok`; an error (or a panic) rolls every change back.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&QueueTx<'_>) -> Result<T, SyncError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| corruption(&self.path, e))?;
        let out = f(&QueueTx {
            conn: &*tx,
            path: &self.path,
        })?;
        tx.commit().map_err(|e| corruption(&self.path, e))?;
        Ok(out)
    }

    /// Append one event. Durable once this returns.
    pub fn append(&mut self, event: &PushEvent) -> Result<(), SyncError> {
        self.transaction(|tx| tx.append(event))
    }

    /// Remove every event, returning how many were removed.
    pub fn clear(&mut self) -> Result<usize, SyncError> {
        self.transaction(|tx| tx.clear())
    }

    /// All pending events, oldest first.
    pub fn list(&self) -> Result<Vec<PushEvent>, SyncError> {
        read_all(&self.conn, &self.path)
    }

    pub fn len(&self) -> Result<usize, SyncError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM push_queue", [], |row| row.get(0))
            .map_err(|e| self.corrupt(e))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }

    /// Release the file handle, surfacing any error from the final flush.
    pub fn close(self) -> Result<(), SyncError> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| corruption(&path, e))
    }

    fn corrupt(&self, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> SyncError {
        corruption(&self.path, source)
    }
}

/// Mutations available inside [`PushQueueStore::transaction`].
pub struct QueueTx<'a> {
    conn: &'a Connection,
    path: &'a Path,
}

impl QueueTx<'_> {
    pub fn append(&self, event: &PushEvent) -> Result<(), SyncError> {
        let payload = serde_json::to_string(event).context("Failed to encode push event")?;
        self.conn
            .execute(
                "INSERT INTO push_queue (payload, recorded_at) VALUES (?1, ?2)",
                params![
                    payload,
                    event.recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                ],
            )
            .map_err(|e| corruption(self.path, e))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<usize, SyncError> {
        self.conn
            .execute("DELETE FROM push_queue", [])
            .map_err(|e| corruption(self.path, e))
    }

    pub fn list(&self) -> Result<Vec<PushEvent>, SyncError> {
        read_all(self.conn, self.path)
    }
}

fn read_all(conn: &Connection, path: &Path) -> Result<Vec<PushEvent>, SyncError> {
    let mut stmt = conn
        .prepare("SELECT seq, payload FROM push_queue ORDER BY seq")
        .map_err(|e| corruption(path, e))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| corruption(path, e))?;

    let mut events = Vec::new();
    for row in rows {
        let (seq, payload) = row.map_err(|e| corruption(path, e))?;
        let event = serde_json::from_str(&payload)
            .map_err(|source| SyncError::CorruptEntry { seq, source })?;
        events.push(event);
    }
    Ok(events)
}

fn corruption(
    path: &Path,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> SyncError {
    SyncError::StoreCorruption {
        path: path.to_path_buf(),
        source: source.into(),
    }
}
