// ABOUTME: Ordered key-value seam the storage engines run on, with in-memory and SQLite backends.
// ABOUTME: Keys compare lexicographically as bytes; every operation runs inside a caller-owned transaction.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a key-value backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Scan order over a key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

pub type Pair = (Vec<u8>, Vec<u8>);

/// Operations available inside a transaction.
pub trait Transaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Removing an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), KvError>;

    /// Rows with `low <= key < high` in `direction` order. An empty `high`
    /// leaves the range unbounded above; a `limit` of 0 means no limit.
    fn scan(
        &mut self,
        low: &[u8],
        high: &[u8],
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<Pair>, KvError>;
}

/// A store that hands out transactions.
pub trait Database: Send + Sync {
    /// Run `f` in a new transaction. The transaction commits when `f`
    /// returns `Ok` and rolls back when it returns `Err`.
    fn with_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<KvError>;
}

/// In-process ordered store. Transactions run one at a time and see their
/// own uncommitted writes.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Database for MemoryDatabase {
    fn with_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<KvError>,
    {
        let mut data = self.data.write();
        let mut tx = MemoryTx {
            base: &data,
            overlay: BTreeMap::new(),
        };

        let value = f(&mut tx)?;

        let overlay = tx.overlay;
        for (key, change) in overlay {
            match change {
                Some(v) => {
                    data.insert(key, v);
                }
                None => {
                    data.remove(&key);
                }
            }
        }

        Ok(value)
    }
}

struct MemoryTx<'a> {
    base: &'a BTreeMap<Vec<u8>, Vec<u8>>,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

fn bounds<'k>(low: &'k [u8], high: &'k [u8]) -> (Bound<&'k [u8]>, Bound<&'k [u8]>) {
    let upper = if high.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(high)
    };
    (Bound::Included(low), upper)
}

impl Transaction for MemoryTx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        match self.overlay.get(key) {
            Some(change) => Ok(change.clone()),
            None => Ok(self.base.get(key).cloned()),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KvError> {
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan(
        &mut self,
        low: &[u8],
        high: &[u8],
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<Pair>, KvError> {
        if !high.is_empty() && low >= high {
            return Ok(Vec::new());
        }

        let limit = if limit == 0 { usize::MAX } else { limit };
        let base = self
            .base
            .range::<[u8], _>(bounds(low, high))
            .map(|(k, v)| (k.as_slice(), v.as_slice()));
        let overlay = self
            .overlay
            .range::<[u8], _>(bounds(low, high))
            .map(|(k, change)| (k.as_slice(), change.as_deref()));

        Ok(match direction {
            Direction::Forward => merge_rows(base, overlay, limit, |a, b| a.cmp(b)),
            Direction::Reverse => merge_rows(base.rev(), overlay.rev(), limit, |a, b| b.cmp(a)),
        })
    }
}

/// Walk committed rows and pending changes together in scan order, stopping
/// once `limit` visible rows are collected. A pending change shadows the
/// committed row with the same key; `None` hides it.
fn merge_rows<'a>(
    base: impl Iterator<Item = (&'a [u8], &'a [u8])>,
    overlay: impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)>,
    limit: usize,
    order: impl Fn(&[u8], &[u8]) -> Ordering,
) -> Vec<Pair> {
    let mut base = base.peekable();
    let mut overlay = overlay.peekable();
    let mut rows = Vec::new();

    while rows.len() < limit {
        let next = match (base.peek(), overlay.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((b, _)), Some((o, _))) => order(*b, *o),
        };

        let row = match next {
            Ordering::Less => base.next().map(|(k, v)| (k, Some(v))),
            Ordering::Greater => overlay.next(),
            Ordering::Equal => {
                base.next();
                overlay.next()
            }
        };

        if let Some((key, Some(value))) = row {
            rows.push((key.to_vec(), value.to_vec()));
        }
    }

    rows
}

/// SQLite-backed ordered store: a single `kv` table keyed by BLOB, whose
/// memcmp collation gives lexicographic byte order.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::migrate(conn)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        Self::migrate(Connection::open_in_memory()?)
    }

    fn migrate(conn: Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )?;

        tracing::debug!("sqlite journal schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Database for SqliteDatabase {
    fn with_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<KvError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(KvError::from)?;

        let value = f(&mut SqliteTx { conn: &tx })?;

        tx.commit().map_err(KvError::from)?;
        Ok(value)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")?
            .query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.conn
            .prepare_cached(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, value])?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KvError> {
        self.conn
            .prepare_cached("DELETE FROM kv WHERE key = ?1")?
            .execute(params![key])?;
        Ok(())
    }

    fn scan(
        &mut self,
        low: &[u8],
        high: &[u8],
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<Pair>, KvError> {
        let order = match direction {
            Direction::Forward => "ASC",
            Direction::Reverse => "DESC",
        };
        let limit = if limit == 0 { -1 } else { limit as i64 };

        let mut rows = Vec::new();
        if high.is_empty() {
            let sql = format!(
                "SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key {} LIMIT ?2",
                order
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let mapped = stmt.query_map(params![low, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let sql = format!(
                "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key {} LIMIT ?3",
                order
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let mapped = stmt.query_map(params![low, high, limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(db: &impl Database) {
        db.with_tx(|tx| -> Result<(), KvError> {
            for key in [b"a1".as_slice(), b"a2", b"a3", b"b1"] {
                tx.put(key, key)?;
            }
            Ok(())
        })
        .unwrap();
    }

    fn keys(rows: Vec<Pair>) -> Vec<Vec<u8>> {
        rows.into_iter().map(|(k, _)| k).collect()
    }

    fn exercise(db: &impl Database) {
        seed(db);

        db.with_tx(|tx| -> Result<(), KvError> {
            assert_eq!(tx.get(b"a2")?, Some(b"a2".to_vec()));
            assert_eq!(tx.get(b"zz")?, None);

            let forward = keys(tx.scan(b"a", b"b", Direction::Forward, 0)?);
            assert_eq!(forward, vec![b"a1".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);

            let reverse = keys(tx.scan(b"a", b"b", Direction::Reverse, 2)?);
            assert_eq!(reverse, vec![b"a3".to_vec(), b"a2".to_vec()]);

            let open = keys(tx.scan(b"a3", b"", Direction::Forward, 0)?);
            assert_eq!(open, vec![b"a3".to_vec(), b"b1".to_vec()]);

            assert!(tx.scan(b"b", b"a", Direction::Forward, 0)?.is_empty());
            Ok(())
        })
        .unwrap();

        // Uncommitted writes are visible inside the transaction only.
        let failed: Result<(), KvError> = db.with_tx(|tx| {
            tx.delete(b"a1")?;
            tx.put(b"a0", b"new")?;
            let seen = keys(tx.scan(b"a", b"b", Direction::Forward, 0)?);
            assert_eq!(seen, vec![b"a0".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);
            Err(KvError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(failed.is_err());

        db.with_tx(|tx| -> Result<(), KvError> {
            assert_eq!(tx.get(b"a1")?, Some(b"a1".to_vec()));
            assert_eq!(tx.get(b"a0")?, None);
            tx.delete(b"missing")?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn memory_backend_scans_and_rolls_back() {
        let db = MemoryDatabase::new();
        exercise(&db);
        assert_eq!(db.len(), 4);
    }

    #[test]
    fn memory_limit_counts_visible_rows_after_pending_changes() {
        let db = MemoryDatabase::new();
        seed(&db);

        db.with_tx(|tx| -> Result<(), KvError> {
            tx.delete(b"a3")?;
            tx.put(b"a2", b"changed")?;
            tx.put(b"a25", b"new")?;

            let reverse = tx.scan(b"a", b"b", Direction::Reverse, 2)?;
            assert_eq!(
                reverse,
                vec![
                    (b"a25".to_vec(), b"new".to_vec()),
                    (b"a2".to_vec(), b"changed".to_vec()),
                ]
            );

            let forward = keys(tx.scan(b"a", b"", Direction::Forward, 3)?);
            assert_eq!(forward, vec![b"a1".to_vec(), b"a2".to_vec(), b"a25".to_vec()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn sqlite_backend_scans_and_rolls_back() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        exercise(&db);
    }

    #[test]
    fn sqlite_backend_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.db");

        seed(&SqliteDatabase::open(&path).unwrap());

        let db = SqliteDatabase::open(&path).unwrap();
        let count = db
            .with_tx(|tx| tx.scan(b"", b"", Direction::Forward, 0).map(|rows| rows.len()))
            .unwrap();
        assert_eq!(count, 4);
    }
}
