//! Process-wide registry of shared, ref-counted writer connections (C4).
//!
//! The teacher opens one `rusqlite::Connection` per `IdentityDisk`. A
//! dataset here is opened from multiple subsystems in one process (search
//! engine, ingestion pipeline, CLI) that must not each hold their own
//! writer handle against the same file, so this registry is the single
//! broker: `acquire`/`release` are ref-counted (a `Dataset` holds its
//! `ConnectionHandle` for its whole lifetime and releases it on `close`,
//! rather than forgetting it), `force_close` is reserved for evicting an
//! entry outright, `replace_connection` swaps a registered entry's
//! connection in place without ever dropping the registration, and a
//! background sweeper (opt-in, since a one-shot CLI process has no use for
//! it) closes connections idle past a threshold.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::{RagliteError, Result};

struct Entry {
    conn: Arc<Mutex<Connection>>,
    ref_count: u32,
    last_used: Instant,
}

/// Default idle timeout before the sweeper closes an unreferenced
/// connection (spec.md §4.4).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A handle to a shared writer connection. Dropping it releases the
/// registry's reference; the connection itself stays warm until the
/// sweeper (or an explicit `force_close`) evicts it.
pub struct ConnectionHandle {
    manager: ConnectionManager,
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl ConnectionHandle {
    pub fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.manager.release(&self.path);
    }
}

/// The registry itself. Cheaply cloneable (an `Arc` around the map); tests
/// instantiate their own instance rather than reaching for a process-level
/// global, per spec.md §9's guidance against language-level singletons.
#[derive(Clone)]
pub struct ConnectionManager {
    entries: Arc<Mutex<HashMap<PathBuf, Entry>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        ConnectionManager {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn canonicalize(path: &Path) -> PathBuf {
        // The dataset file may not exist yet on first `create`; canonicalize
        // best-effort and fall back to the given path so a fresh dataset
        // still gets a stable registry key.
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Creates or reuses a writer connection for `path`. If a cached entry
    /// points at a file that has since been deleted out from under it, the
    /// cached entry is force-closed and a fresh one is opened.
    pub fn acquire(&self, path: &Path) -> Result<ConnectionHandle> {
        let key = Self::canonicalize(path);
        let mut entries = self.entries.lock()?;

        if let Some(entry) = entries.get(&key) {
            let stale = !path.exists() && entry.ref_count == 0;
            if !stale {
                let conn = entry.conn.clone();
                let entry = entries.get_mut(&key).unwrap();
                entry.ref_count += 1;
                entry.last_used = Instant::now();
                drop(entries);
                return Ok(ConnectionHandle {
                    manager: self.clone(),
                    path: key,
                    conn,
                });
            }
            entries.remove(&key);
        }

        let conn = Connection::open(path).map_err(map_open_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_open_error)?;
        let conn = Arc::new(Mutex::new(conn));
        entries.insert(
            key.clone(),
            Entry {
                conn: conn.clone(),
                ref_count: 1,
                last_used: Instant::now(),
            },
        );
        drop(entries);
        Ok(ConnectionHandle {
            manager: self.clone(),
            path: key,
            conn,
        })
    }

    /// Decrements the refcount for `path`. The connection is kept warm;
    /// only the sweeper or `force_close` actually drops it.
    fn release(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(path) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.last_used = Instant::now();
            }
        }
    }

    /// Evicts the entry for `path` regardless of refcount. Used before a
    /// destructive rebuild (spec.md §4.13's `force_rebuild` preflight).
    pub fn force_close(&self, path: &Path) -> Result<()> {
        let key = Self::canonicalize(path);
        let mut entries = self.entries.lock()?;
        entries.remove(&key);
        Ok(())
    }

    /// Swaps the `Connection` backing `path`'s already-registered entry for
    /// `new_conn`, in place: the entry's `Arc<Mutex<Connection>>` (and
    /// therefore every outstanding clone of it — held by a `Dataset`'s
    /// pipelines, index, etc.) is left untouched, only the guarded value
    /// changes. Used by the `force_rebuild` preflight (spec.md §4.13) to
    /// reopen a freshly recreated database file without ever leaving the
    /// registry without an entry for a path that still has a live,
    /// actively-written connection — unlike `force_close` followed by a raw
    /// `Connection::open`, this keeps `acquire()` from any other holder of
    /// this manager returning the same connection throughout the swap.
    /// Errors if nothing is registered for `path` yet (the caller must hold
    /// a handle acquired from this same manager).
    pub fn replace_connection(&self, path: &Path, new_conn: Connection) -> Result<()> {
        let key = Self::canonicalize(path);
        let mut entries = self.entries.lock()?;
        let entry = entries.get_mut(&key).ok_or_else(|| {
            RagliteError::Validation(format!(
                "no registered connection for {} to replace",
                path.display()
            ))
        })?;
        entry.last_used = Instant::now();
        let conn_arc = entry.conn.clone();
        drop(entries);
        *conn_arc.lock()? = new_conn;
        Ok(())
    }

    /// Closes connections that have had `ref_count == 0` for longer than
    /// `idle_timeout`. Intended to run on a periodic timer; a one-shot CLI
    /// invocation never needs to call this.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> Result<usize> {
        let mut entries = self.entries.lock()?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| {
            !(entry.ref_count == 0 && now.duration_since(entry.last_used) > idle_timeout)
        });
        Ok(before - entries.len())
    }

    /// Retries `acquire` on contention errors with a fixed backoff until
    /// `deadline` elapses, then surfaces `Busy` (spec.md §4.4).
    pub fn acquire_with_deadline(
        &self,
        path: &Path,
        deadline: Duration,
    ) -> Result<ConnectionHandle> {
        let started = Instant::now();
        loop {
            match self.acquire(path) {
                Ok(handle) => return Ok(handle),
                Err(RagliteError::Database(e)) => {
                    let busy = matches!(
                        e.sqlite_error_code(),
                        Some(rusqlite::ErrorCode::DatabaseBusy)
                            | Some(rusqlite::ErrorCode::DatabaseLocked)
                    );
                    if !busy || started.elapsed() >= deadline {
                        return Err(RagliteError::Busy(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// `rusqlite` reports "not a database" (e.g. the file exists but isn't a
/// SQLite file, or is encrypted/corrupted) as a `NotADatabase` error code;
/// surfaced as `DatabaseCorrupt` rather than the generic `Database` variant
/// (spec.md §7: "sub-kind `Corrupt` when the file is not a database").
fn map_open_error(err: rusqlite::Error) -> RagliteError {
    if let rusqlite::Error::SqliteFailure(e, ref msg) = err {
        if e.code == rusqlite::ErrorCode::NotADatabase {
            return RagliteError::DatabaseCorrupt(
                msg.clone().unwrap_or_else(|| "file is not a database".to_string()),
            );
        }
    }
    RagliteError::from(err)
}

trait SqliteErrorCodeExt {
    fn sqlite_error_code(&self) -> Option<rusqlite::ErrorCode>;
}

impl SqliteErrorCodeExt for rusqlite::Error {
    fn sqlite_error_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_same_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        let manager = ConnectionManager::new();

        let a = manager.acquire(&db_path).unwrap();
        let b = manager.acquire(&db_path).unwrap();
        assert!(Arc::ptr_eq(a.conn(), b.conn()));
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn force_close_evicts_regardless_of_refcount() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        let manager = ConnectionManager::new();
        let handle = manager.acquire(&db_path).unwrap();
        manager.force_close(&db_path).unwrap();
        assert_eq!(manager.active_count(), 0);
        drop(handle);
    }

    #[test]
    fn replace_connection_preserves_the_arc_and_refcount() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        let manager = ConnectionManager::new();
        let handle = manager.acquire(&db_path).unwrap();
        let original_arc = handle.conn().clone();

        std::fs::remove_file(&db_path).unwrap();
        let fresh = Connection::open(&db_path).unwrap();
        manager.replace_connection(&db_path, fresh).unwrap();

        assert!(Arc::ptr_eq(handle.conn(), &original_arc));
        assert_eq!(manager.active_count(), 1);

        let other = manager.acquire(&db_path).unwrap();
        assert!(Arc::ptr_eq(other.conn(), handle.conn()));
    }

    #[test]
    fn replace_connection_errors_when_nothing_is_registered() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        let manager = ConnectionManager::new();
        let fresh = Connection::open(&db_path).unwrap();
        assert!(manager.replace_connection(&db_path, fresh).is_err());
    }

    #[test]
    fn opening_a_non_database_file_surfaces_database_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        std::fs::write(&db_path, b"not a sqlite file at all, just garbage bytes").unwrap();
        let manager = ConnectionManager::new();
        let err = manager.acquire(&db_path).unwrap_err();
        assert!(matches!(err, RagliteError::DatabaseCorrupt(_)));
    }

    #[test]
    fn sweep_idle_only_removes_unreferenced_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("db.sqlite");
        let manager = ConnectionManager::new();
        let handle = manager.acquire(&db_path).unwrap();
        let swept = manager.sweep_idle(Duration::from_secs(0)).unwrap();
        assert_eq!(swept, 0, "held handle must not be swept");
        drop(handle);
        let swept = manager.sweep_idle(Duration::from_secs(0)).unwrap();
        assert_eq!(swept, 1);
    }
}
