// ABOUTME: Resumable range query over one index, saved under its own id after every page.
// ABOUTME: A cursor opened in one transaction can be reloaded and continued in any later one.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::codec::RecordCodec;
use crate::error::{StoreError, parse_id};
use crate::kv::{Direction, Transaction};
use crate::table::{Record, Table};

/// Persisted query plan and continuation point of a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub id: Ulid,
    pub table: u16,
    pub index: u16,
    pub low: Vec<u8>,
    pub high: Vec<u8>,
    pub direction: Direction,
    pub page: usize,
    /// Service names rows must match (case-insensitive); empty means all.
    #[serde(default)]
    pub services: Vec<String>,
    /// Only index keys of exactly this length belong to the query.
    #[serde(default)]
    pub key_len: Option<usize>,
    #[serde(default)]
    pub last_key: Option<Vec<u8>>,
    #[serde(default)]
    pub empty: bool,
}

/// Parameters of a new cursor.
#[derive(Debug, Clone)]
pub struct Query {
    pub index: u16,
    pub low: Vec<u8>,
    pub high: Vec<u8>,
    pub direction: Direction,
    pub page: usize,
    pub services: Vec<String>,
    pub key_len: Option<usize>,
}

pub struct Cursor<'t, R, C> {
    table: &'t Table<R, C>,
    state: CursorState,
}

impl<R, C> std::fmt::Debug for Cursor<'_, R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("state", &self.state).finish()
    }
}

impl<'t, R: Record, C: RecordCodec> Cursor<'t, R, C> {
    /// Create a cursor and save its initial state.
    pub fn open(
        tx: &mut dyn Transaction,
        table: &'t Table<R, C>,
        query: Query,
    ) -> Result<Self, StoreError> {
        if query.page == 0 {
            return Err(StoreError::Validation("page size must be positive".to_string()));
        }

        let cursor = Self {
            table,
            state: CursorState {
                id: Ulid::new(),
                table: table.keys().table(),
                index: query.index,
                low: query.low,
                high: query.high,
                direction: query.direction,
                page: query.page,
                services: query.services,
                key_len: query.key_len,
                last_key: None,
                empty: false,
            },
        };

        cursor.save(tx)?;
        tracing::debug!(cursor = %cursor.state.id, index = cursor.state.index, "opened cursor");
        Ok(cursor)
    }

    /// Resume a saved cursor.
    pub fn load(
        tx: &mut dyn Transaction,
        table: &'t Table<R, C>,
        id: &str,
    ) -> Result<Self, StoreError> {
        let cursor_id = parse_id(id)?;
        let context = || format!("cursor {}", id);

        let bytes = tx
            .get(&table.keys().cursor(cursor_id))
            .map_err(|e| StoreError::select(context(), e))?
            .ok_or_else(|| StoreError::NotFound {
                what: "cursor",
                id: id.to_string(),
            })?;

        let state: CursorState =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::select(context(), e))?;

        Ok(Self { table, state })
    }

    pub fn id(&self) -> String {
        self.state.id.to_string()
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// True once a fetch returned no rows at all. Pages shortened by the
    /// service filter do not count.
    pub fn is_empty(&self) -> bool {
        self.state.empty
    }

    /// Fetch up to `size` rows past the continuation point (the saved page
    /// size when `size` is 0). Non-empty `services` replaces the saved
    /// service filter. The new continuation point is saved before returning.
    pub fn next_page(
        &mut self,
        tx: &mut dyn Transaction,
        size: usize,
        services: &[&str],
    ) -> Result<Vec<R>, StoreError> {
        let size = if size == 0 { self.state.page } else { size };
        if !services.is_empty() {
            self.state.services = services.iter().map(|s| s.to_string()).collect();
        }

        let rows = tx
            .scan(&self.state.low, &self.state.high, self.state.direction, size)
            .map_err(|e| StoreError::select(format!("cursor {}", self.state.id), e))?;

        self.state.empty = rows.is_empty();

        let mut page = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            self.advance(&key);

            if self.state.key_len.is_some_and(|len| len != key.len()) {
                continue;
            }

            let (_, record) = self.table.resolve(tx, key)?;
            if self.wants(record.service()) {
                page.push(record);
            }
        }

        self.save(tx)?;
        Ok(page)
    }

    fn advance(&mut self, key: &[u8]) {
        match self.state.direction {
            Direction::Forward => {
                let mut low = key.to_vec();
                low.push(0);
                self.state.low = low;
            }
            Direction::Reverse => self.state.high = key.to_vec(),
        }
        self.state.last_key = Some(key.to_vec());
    }

    fn wants(&self, service: &str) -> bool {
        if self.state.services.is_empty() {
            return true;
        }
        let service = service.to_lowercase();
        self.state
            .services
            .iter()
            .any(|s| s.to_lowercase() == service)
    }

    fn save(&self, tx: &mut dyn Transaction) -> Result<(), StoreError> {
        let context = || format!("cursor {}", self.state.id);
        let bytes = serde_json::to_vec(&self.state).map_err(|e| StoreError::insert(context(), e))?;
        tx.put(&self.table.keys().cursor(self.state.id), &bytes)
            .map_err(|e| StoreError::insert(context(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::kv::{Database, MemoryDatabase};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: Ulid,
        service: String,
        n: u64,
    }

    impl Record for Row {
        const KIND: &'static str = "row";

        fn id(&self) -> Ulid {
            self.id
        }

        fn service(&self) -> &str {
            &self.service
        }

        fn indexes(&self) -> Vec<(u16, Vec<u8>)> {
            vec![(1, self.n.to_be_bytes().to_vec())]
        }
    }

    fn seeded(count: u64) -> (MemoryDatabase, Table<Row, JsonCodec>) {
        let db = MemoryDatabase::new();
        let table = Table::new(9, JsonCodec);
        db.with_tx(|tx| -> Result<(), StoreError> {
            for n in 0..count {
                let service = if n % 2 == 0 { "even" } else { "odd" };
                table.upsert(
                    tx,
                    &Row {
                        id: Ulid::new(),
                        service: service.to_string(),
                        n,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        (db, table)
    }

    fn query(table: &Table<Row, JsonCodec>, direction: Direction, page: usize) -> Query {
        let (low, high) = table.keys().prefix_range(1, &[]);
        Query {
            index: 1,
            low,
            high,
            direction,
            page,
            services: Vec::new(),
            key_len: None,
        }
    }

    #[test]
    fn pages_forward_until_empty() {
        let (db, table) = seeded(7);

        let seen = db
            .with_tx(|tx| -> Result<Vec<Vec<u64>>, StoreError> {
                let mut cursor = Cursor::open(tx, &table, query(&table, Direction::Forward, 3))?;
                let mut pages = Vec::new();
                loop {
                    let page = cursor.next_page(tx, 0, &[])?;
                    if cursor.is_empty() {
                        assert!(page.is_empty());
                        break;
                    }
                    pages.push(page.into_iter().map(|r| r.n).collect());
                }
                Ok(pages)
            })
            .unwrap();

        assert_eq!(seen, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn reverse_cursor_resumes_in_new_transaction() {
        let (db, table) = seeded(5);

        let (id, first) = db
            .with_tx(|tx| -> Result<(String, Vec<u64>), StoreError> {
                let mut cursor = Cursor::open(tx, &table, query(&table, Direction::Reverse, 2))?;
                let page = cursor.next_page(tx, 0, &[])?;
                Ok((cursor.id(), page.into_iter().map(|r| r.n).collect()))
            })
            .unwrap();
        assert_eq!(first, vec![4, 3]);

        let rest = db
            .with_tx(|tx| -> Result<Vec<u64>, StoreError> {
                let mut cursor = Cursor::load(tx, &table, &id)?;
                assert!(!cursor.is_empty());
                let page = cursor.next_page(tx, 10, &[])?;
                Ok(page.into_iter().map(|r| r.n).collect())
            })
            .unwrap();
        assert_eq!(rest, vec![2, 1, 0]);
    }

    #[test]
    fn service_filter_shortens_pages_without_exhausting() {
        let (db, table) = seeded(4);

        db.with_tx(|tx| -> Result<(), StoreError> {
            let mut cursor = Cursor::open(tx, &table, query(&table, Direction::Forward, 2))?;
            let page = cursor.next_page(tx, 0, &["EVEN"])?;
            assert_eq!(page.iter().map(|r| r.n).collect::<Vec<_>>(), vec![0]);
            assert!(!cursor.is_empty());

            let page = cursor.next_page(tx, 0, &[])?;
            assert_eq!(page.iter().map(|r| r.n).collect::<Vec<_>>(), vec![2]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn service_filter_folds_unicode_case() {
        let db = MemoryDatabase::new();
        let table: Table<Row, JsonCodec> = Table::new(9, JsonCodec);
        db.with_tx(|tx| -> Result<(), StoreError> {
            for (n, service) in ["сервис", "другой", "СЕРВИС"].into_iter().enumerate() {
                table.upsert(
                    tx,
                    &Row {
                        id: Ulid::new(),
                        service: service.to_string(),
                        n: n as u64,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();

        let found = db
            .with_tx(|tx| -> Result<Vec<u64>, StoreError> {
                let mut cursor = Cursor::open(tx, &table, query(&table, Direction::Forward, 10))?;
                let page = cursor.next_page(tx, 0, &["Сервис"])?;
                Ok(page.into_iter().map(|r| r.n).collect())
            })
            .unwrap();
        assert_eq!(found, vec![0, 2]);
    }

    #[test]
    fn unknown_cursor_is_not_found() {
        let (db, table) = seeded(0);
        let err = db
            .with_tx(|tx| Cursor::load(tx, &table, &Ulid::new().to_string()).map(|_| ()))
            .unwrap_err();
        assert!(err.is_not_found());

        let err = db
            .with_tx(|tx| Cursor::load(tx, &table, "bogus").map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { .. }));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let (db, table) = seeded(0);
        let err = db
            .with_tx(|tx| Cursor::open(tx, &table, query(&table, Direction::Forward, 0)).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
