// ABOUTME: Recorder driver that persists closed entries through the journal storage engine.
// ABOUTME: Each entry and its crash reports are written in one transaction on the wrapped database.

use std::sync::Arc;

use stagelog_core::entry::Entry;
use stagelog_core::recorder::{Driver, DriverError};

use crate::codec::{JsonCodec, RecordCodec};
use crate::error::StoreError;
use crate::journal::JournalStore;
use crate::kv::Database;

pub struct StoreDriver<D, C = JsonCodec> {
    db: Arc<D>,
    store: JournalStore<C>,
}

impl<D, C> std::fmt::Debug for StoreDriver<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreDriver").finish_non_exhaustive()
    }
}

impl<D: Database, C: RecordCodec> StoreDriver<D, C> {
    pub fn new(db: Arc<D>, store: JournalStore<C>) -> Self {
        Self { db, store }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn store(&self) -> &JournalStore<C> {
        &self.store
    }
}

impl<D: Database, C: RecordCodec> Driver for StoreDriver<D, C> {
    fn insert_entry(&self, entry: &Entry) -> Result<(), DriverError> {
        self.db
            .with_tx(|tx| self.store.import(tx, std::slice::from_ref(entry)))
            .map_err(|e: StoreError| Box::new(e) as DriverError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryDatabase;
    use stagelog_core::fault::FaultKind;
    use stagelog_core::recorder::Journal;
    use stagelog_core::taxonomy::Taxonomy;

    #[test]
    fn closed_recorder_lands_in_store() {
        let db = Arc::new(MemoryDatabase::new());
        let driver = Arc::new(StoreDriver::new(Arc::clone(&db), JournalStore::new(36, 32)));
        let journal = Journal::builder("billing", Arc::new(Taxonomy::new("billing", "")))
            .driver(driver.clone())
            .build();

        let rec = journal.recorder();
        rec.print("working");
        rec.crash(Some(&FaultKind::new("boom").fault("exploded")));
        let entry = rec.close();

        let stored = db
            .with_tx(|tx| driver.store().by_id_with_crash(tx, &entry.id.to_string()))
            .unwrap();
        assert_eq!(stored, entry);
    }
}
