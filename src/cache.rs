//! Derived query cache.
//!
//! A small SQLite database under `.issue-sync/` that answers listing queries
//! (`issue-sync status`) without re-parsing every record file. Strictly
//! derived state: deleting the database is always safe, the next rebuild
//! recreates it from the files.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::record::Record;
use crate::store::Workspace;

/// One cached row, enough to answer listing queries.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub status: String,
    pub path: String,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
    /// Held by the thread currently rebuilding.
    rebuild_gate: Mutex<()>,
    /// Set when a rebuild was requested while one was already running; the
    /// running thread re-scans before releasing the gate, so concurrent
    /// requests coalesce into at most one extra pass.
    rebuild_pending: AtomicBool,
}

impl CacheStore {
    /// Open (or create) the cache database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id     TEXT PRIMARY KEY,
                kind   TEXT NOT NULL,
                title  TEXT NOT NULL,
                status TEXT NOT NULL,
                path   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);",
        )
        .context("failed to create cache schema")?;

        Ok(CacheStore {
            conn: Mutex::new(conn),
            rebuild_gate: Mutex::new(()),
            rebuild_pending: AtomicBool::new(false),
        })
    }

    /// Insert or replace the rows for the given records.
    pub fn upsert(&self, records: &[Record]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for record in records {
            let path = record
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            tx.execute(
                "INSERT OR REPLACE INTO records (id, kind, title, status, path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.kind.to_string(),
                    record.fields.title,
                    record.fields.status,
                    path,
                ],
            )?;
        }
        tx.commit().context("failed to commit cache update")?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<CachedRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, title, status, path FROM records WHERE id = ?1",
            params![id],
            Self::row_to_record,
        )
        .optional()
        .context("cache lookup failed")
    }

    /// List cached records, optionally filtered by status.
    pub fn list(&self, status: Option<&str>) -> Result<Vec<CachedRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut rows = Vec::new();

        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, title, status, path FROM records
                     WHERE status = ?1 ORDER BY id",
                )?;
                let iter = stmt.query_map(params![status], Self::row_to_record)?;
                for row in iter {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, title, status, path FROM records ORDER BY id",
                )?;
                let iter = stmt.query_map([], Self::row_to_record)?;
                for row in iter {
                    rows.push(row?);
                }
            }
        }

        Ok(rows)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        Ok(count == 0)
    }

    /// Refresh the rows for the given paths: files that exist and parse are
    /// upserted, rows for paths that no longer exist are dropped. Used after
    /// a write batch, where the touched paths are known.
    pub fn rebuild_incremental(&self, paths: &[std::path::PathBuf]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for path in paths {
            if path.exists() {
                let record = match Record::from_file(path) {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("cache skipping {}: {e:#}", path.display());
                        continue;
                    }
                };
                tx.execute(
                    "INSERT OR REPLACE INTO records (id, kind, title, status, path)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.id,
                        record.kind.to_string(),
                        record.fields.title,
                        record.fields.status,
                        path.to_string_lossy(),
                    ],
                )?;
            } else {
                tx.execute(
                    "DELETE FROM records WHERE path = ?1",
                    params![path.to_string_lossy()],
                )?;
            }
        }
        tx.commit().context("failed to commit cache update")?;
        Ok(())
    }

    /// Rebuild the whole cache from the workspace files.
    ///
    /// If another thread is already rebuilding, this marks a rebuild as
    /// pending and returns immediately; the rebuilding thread runs one more
    /// pass before finishing, so every request is covered by a scan that
    /// started after it.
    pub fn rebuild_full(&self, workspace: &Workspace) -> Result<()> {
        let guard = match self.rebuild_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.rebuild_pending.store(true, Ordering::SeqCst);
                log::debug!("cache rebuild already running, coalescing request");
                return Ok(());
            }
        };

        self.rebuild_once(workspace)?;
        while self.rebuild_pending.swap(false, Ordering::SeqCst) {
            self.rebuild_once(workspace)?;
        }

        drop(guard);
        Ok(())
    }

    fn rebuild_once(&self, workspace: &Workspace) -> Result<()> {
        let records = workspace.load_all();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM records", [])?;
        for record in &records {
            let path = record
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            tx.execute(
                "INSERT INTO records (id, kind, title, status, path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.kind.to_string(),
                    record.fields.title,
                    record.fields.status,
                    path,
                ],
            )?;
        }
        tx.commit().context("failed to commit cache rebuild")?;

        log::debug!("cache rebuilt with {} records", records.len());
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedRecord> {
        Ok(CachedRecord {
            id: row.get(0)?,
            kind: row.get(1)?,
            title: row.get(2)?,
            status: row.get(3)?,
            path: row.get(4)?,
        })
    }
}
