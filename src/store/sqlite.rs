use std::path::Path;
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{DurableStore, Result, StoreError, Versioned, Write, WriteBatch};

pub const SCHEMA_VERSION: i64 = 1;

/// How long a writer waits on another process's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. Batches run in IMMEDIATE transactions so several
/// processes can share one database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::InvalidData(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        initialize(&conn)?;
        tracing::info!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    // In-memory databases stay in "memory" mode; that is fine.
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(%mode, "sqlite journal mode");
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key     TEXT PRIMARY KEY,
            value   TEXT NOT NULL,
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS list_items (
            list  TEXT NOT NULL,
            idx   INTEGER NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (list, idx)
        );

        CREATE TABLE IF NOT EXISTS schema_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn version_on(conn: &Connection, key: &str) -> Result<u64> {
    let v: Option<i64> = conn
        .query_row("SELECT version FROM kv WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(v.unwrap_or(0) as u64)
}

fn len_on(conn: &Connection, list: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM list_items WHERE list = ?1",
        [list],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

fn put_on(conn: &Connection, key: &str, value: &str, version: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value, version) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = excluded.version",
        params![key, value, version as i64],
    )?;
    Ok(())
}

fn push_on(conn: &Connection, list: &str, value: &str) -> Result<u64> {
    let idx = len_on(conn, list)?;
    conn.execute(
        "INSERT INTO list_items (list, idx, value) VALUES (?1, ?2, ?3)",
        params![list, idx as i64, value],
    )?;
    Ok(idx + 1)
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let conn = self.lock()?;
        let row = conn
            .query_row("SELECT value, version FROM kv WHERE key = ?1", [key], |row| {
                Ok(Versioned {
                    value: row.get(0)?,
                    version: row.get::<_, i64>(1)? as u64,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn set(&self, key: &str, value: &str, expected_version: u64) -> Result<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if version_on(&tx, key)? != expected_version {
            return Err(StoreError::Conflict { key: key.to_string() });
        }
        put_on(&tx, key, value, expected_version + 1)?;
        tx.commit()?;
        Ok(expected_version + 1)
    }

    fn append(&self, list: &str, value: &str) -> Result<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let len = push_on(&tx, list, value)?;
        tx.commit()?;
        Ok(len)
    }

    fn len(&self, list: &str) -> Result<u64> {
        let conn = self.lock()?;
        len_on(&conn, list)
    }

    fn range(&self, list: &str, start: u64, end: u64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT value FROM list_items WHERE list = ?1 AND idx >= ?2 AND idx < ?3 ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![list, start as i64, end as i64], |row| row.get(0))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        batch.check_distinct()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for write in batch.writes() {
            let ok = match write {
                Write::Set { key, expected_version, .. } => version_on(&tx, key)? == *expected_version,
                Write::Append { list, expected_len, .. } => len_on(&tx, list)? == *expected_len,
            };
            if !ok {
                // Dropping the transaction rolls it back
                return Err(StoreError::Conflict {
                    key: write.target().to_string(),
                });
            }
        }

        for write in batch.writes() {
            match write {
                Write::Set { key, value, expected_version } => {
                    put_on(&tx, key, value, expected_version + 1)?;
                }
                Write::Append { list, value, .. } => {
                    push_on(&tx, list, value)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.set("k", "v", 0).unwrap(), 1);
        let got = store.get("k").unwrap().unwrap();
        assert_eq!(got.value, "v");
        assert_eq!(got.version, 1);
        assert!(store.set("k", "w", 0).unwrap_err().is_conflict());
    }

    #[test]
    fn test_batch_rolls_back_on_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("l", "a").unwrap();

        let mut batch = WriteBatch::new();
        batch.set("k", "v", 0);
        batch.append("l", "b", 0); // stale length

        assert!(store.apply(batch).unwrap_err().is_conflict());
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.len("l").unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.set("k", "v", 0);
            batch.append("l", "a", 0);
            store.apply(batch).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap().version, 1);
        assert_eq!(store.range("l", 0, 10).unwrap(), vec!["a"]);
    }
}
