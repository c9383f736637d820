// ABOUTME: Generic record table over the key-value seam: primary rows plus derived index rows.
// ABOUTME: Upserts replace the previous version's index rows so stored records are never merged.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::codec::RecordCodec;
use crate::error::StoreError;
use crate::keys::{self, KeyBuilder};
use crate::kv::{Direction, Transaction};

/// A storable record and the index values it occupies.
pub trait Record: Serialize + DeserializeOwned {
    /// Name used in error context.
    const KIND: &'static str;

    fn id(&self) -> Ulid;

    /// Service the record originated from, used by cursor filtering.
    fn service(&self) -> &str;

    /// `(index id, index value)` pairs. Repeated pairs are allowed and
    /// collapse onto the same stored row.
    fn indexes(&self) -> Vec<(u16, Vec<u8>)>;
}

/// Primary and index rows for one record kind under one table id.
#[derive(Debug, Clone)]
pub struct Table<R, C> {
    keys: KeyBuilder,
    codec: C,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, C: RecordCodec> Table<R, C> {
    pub fn new(table: u16, codec: C) -> Self {
        Self {
            keys: KeyBuilder::new(table),
            codec,
            _record: PhantomData,
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn get(&self, tx: &mut dyn Transaction, id: Ulid) -> Result<Option<R>, StoreError> {
        let context = || format!("{} {}", R::KIND, id);

        let Some(bytes) = tx
            .get(&self.keys.primary(id))
            .map_err(|e| StoreError::select(context(), e))?
        else {
            return Ok(None);
        };

        let record = self
            .codec
            .decode(&bytes)
            .map_err(|e| StoreError::select(context(), e))?;
        Ok(Some(record))
    }

    /// Write `record`, replacing any stored version with the same id.
    pub fn upsert(&self, tx: &mut dyn Transaction, record: &R) -> Result<(), StoreError> {
        let id = record.id();
        let context = || format!("{} {}", R::KIND, id);

        if let Some(previous) = self.get(tx, id)? {
            self.remove_indexes(tx, &previous)
                .map_err(|e| StoreError::insert(context(), e))?;
        }

        let bytes = self
            .codec
            .encode(record)
            .map_err(|e| StoreError::insert(context(), e))?;
        tx.put(&self.keys.primary(id), &bytes)
            .map_err(|e| StoreError::insert(context(), e))?;

        for (index, value) in record.indexes() {
            tx.put(&self.keys.index(index, &value, id), &[])
                .map_err(|e| StoreError::insert(context(), e))?;
        }

        Ok(())
    }

    /// Remove the record and its index rows. Returns whether it existed.
    pub fn delete(&self, tx: &mut dyn Transaction, id: Ulid) -> Result<bool, StoreError> {
        let context = || format!("{} {}", R::KIND, id);

        let previous = match self.get(tx, id) {
            Ok(previous) => previous,
            Err(err) => return Err(StoreError::delete(context(), err)),
        };
        let Some(previous) = previous else {
            return Ok(false);
        };

        self.remove_indexes(tx, &previous)
            .map_err(|e| StoreError::delete(context(), e))?;
        tx.delete(&self.keys.primary(id))
            .map_err(|e| StoreError::delete(context(), e))?;
        Ok(true)
    }

    /// Index rows in `[low, high)` resolved to their records. A row whose
    /// primary record is missing is reported as a select failure.
    pub fn scan(
        &self,
        tx: &mut dyn Transaction,
        low: &[u8],
        high: &[u8],
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, R)>, StoreError> {
        self.scan_matching(tx, low, high, direction, limit, |_| true)
    }

    /// Like `scan`, skipping index keys rejected by `keep` before their
    /// records are loaded. `limit` applies to raw rows.
    pub fn scan_matching(
        &self,
        tx: &mut dyn Transaction,
        low: &[u8],
        high: &[u8],
        direction: Direction,
        limit: usize,
        keep: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<(Vec<u8>, R)>, StoreError> {
        let rows = tx
            .scan(low, high, direction, limit)
            .map_err(|e| StoreError::select(format!("{} index scan", R::KIND), e))?;

        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            if keep(&key) {
                out.push(self.resolve(tx, key)?);
            }
        }
        Ok(out)
    }

    /// Load the record an index key points at.
    pub fn resolve(
        &self,
        tx: &mut dyn Transaction,
        key: Vec<u8>,
    ) -> Result<(Vec<u8>, R), StoreError> {
        let Some(id) = keys::id_of(&key) else {
            return Err(StoreError::Validation(format!(
                "{} index key too short: {} bytes",
                R::KIND,
                key.len()
            )));
        };

        match self.get(tx, id)? {
            Some(record) => Ok((key, record)),
            None => Err(StoreError::select(
                format!("{} index row", R::KIND),
                format!("no primary row for {}", id),
            )),
        }
    }

    /// Every record of the table in id order.
    pub fn all(&self, tx: &mut dyn Transaction) -> Result<Vec<R>, StoreError> {
        let (low, high) = self.keys.primary_range();
        let rows = tx
            .scan(&low, &high, Direction::Forward, 0)
            .map_err(|e| StoreError::select(format!("all {}", R::KIND), e))?;

        rows.into_iter()
            .map(|(_, bytes)| {
                self.codec
                    .decode(&bytes)
                    .map_err(|e| StoreError::select(format!("all {}", R::KIND), e))
            })
            .collect()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn remove_indexes(&self, tx: &mut dyn Transaction, record: &R) -> Result<(), StoreError> {
        let id = record.id();
        for (index, value) in record.indexes() {
            tx.delete(&self.keys.index(index, &value, id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::kv::{Database, MemoryDatabase};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Ulid,
        service: String,
        tag: String,
    }

    impl Record for Note {
        const KIND: &'static str = "note";

        fn id(&self) -> Ulid {
            self.id
        }

        fn service(&self) -> &str {
            &self.service
        }

        fn indexes(&self) -> Vec<(u16, Vec<u8>)> {
            vec![(1, self.tag.as_bytes().to_vec())]
        }
    }

    fn note(tag: &str) -> Note {
        Note {
            id: Ulid::new(),
            service: "svc".to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn upsert_replaces_stale_index_rows() {
        let db = MemoryDatabase::new();
        let table: Table<Note, JsonCodec> = Table::new(7, JsonCodec);
        let mut n = note("red");

        db.with_tx(|tx| table.upsert(tx, &n)).unwrap();
        n.tag = "blue".to_string();
        db.with_tx(|tx| table.upsert(tx, &n)).unwrap();

        db.with_tx(|tx| -> Result<(), StoreError> {
            let (low, high) = table.keys().prefix_range(1, b"red");
            assert!(table.scan(tx, &low, &high, Direction::Forward, 0)?.is_empty());

            let (low, high) = table.keys().prefix_range(1, b"blue");
            let found = table.scan(tx, &low, &high, Direction::Forward, 0)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].1, n);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_is_idempotent_and_clears_indexes() {
        let db = MemoryDatabase::new();
        let table: Table<Note, JsonCodec> = Table::new(7, JsonCodec);
        let n = note("red");

        db.with_tx(|tx| table.upsert(tx, &n)).unwrap();
        assert!(db.with_tx(|tx| table.delete(tx, n.id)).unwrap());
        assert!(!db.with_tx(|tx| table.delete(tx, n.id)).unwrap());
        assert!(db.is_empty());
    }

    #[test]
    fn dangling_index_row_is_a_select_error() {
        let db = MemoryDatabase::new();
        let table: Table<Note, JsonCodec> = Table::new(7, JsonCodec);
        let id = Ulid::new();

        db.with_tx(|tx| tx.put(&table.keys().index(1, b"red", id), &[]))
            .unwrap();

        let err = db
            .with_tx(|tx| {
                let (low, high) = table.keys().prefix_range(1, b"red");
                table.scan(tx, &low, &high, Direction::Forward, 0)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Select { .. }));
    }
}
