// ABOUTME: Storage engine for journal entries, indexed by start time and by referenced entities.
// ABOUTME: Importing an entry moves its embedded crash reports into the crash table atomically.

use chrono::{DateTime, Utc};
use stagelog_core::config::StagelogConfig;
use stagelog_core::entry::Entry;
use stagelog_core::model_type;
use ulid::Ulid;

use crate::codec::{JsonCodec, RecordCodec};
use crate::crash::CrashStore;
use crate::cursor::{Cursor, Query};
use crate::error::{StoreError, parse_id};
use crate::keys::{self, JOURNAL_ENTITY, JOURNAL_START};
use crate::kv::{Direction, Transaction};
use crate::table::{Record, Table};

impl Record for Entry {
    const KIND: &'static str = "journal entry";

    fn id(&self) -> Ulid {
        self.id
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn indexes(&self) -> Vec<(u16, Vec<u8>)> {
        let start = keys::timestamp(self.start);

        let mut indexes = Vec::with_capacity(self.chain.len() + 1);
        indexes.push((JOURNAL_START, start.to_vec()));

        for stage in self.chain.iter().filter(|stage| stage.references()) {
            let mut value = keys::entity_value(stage.entity_type, &stage.entity_id);
            value.extend_from_slice(&start);
            indexes.push((JOURNAL_ENTITY, value));
        }

        indexes
    }
}

/// Journal entries plus the crash reports their stages reference.
#[derive(Debug, Clone)]
pub struct JournalStore<C = JsonCodec> {
    table: Table<Entry, C>,
    crashes: CrashStore<C>,
}

impl JournalStore<JsonCodec> {
    pub fn new(journal_table: u16, crash_table: u16) -> Self {
        Self::with_codec(journal_table, crash_table, JsonCodec)
    }

    pub fn from_config(config: &StagelogConfig) -> Self {
        Self::new(config.journal_table, config.crash_table)
    }
}

impl<C: RecordCodec> JournalStore<C> {
    /// # Panics
    ///
    /// When both tables share an id.
    pub fn with_codec(journal_table: u16, crash_table: u16, codec: C) -> Self {
        assert_ne!(
            journal_table, crash_table,
            "journal and crash tables must use different ids"
        );

        Self {
            table: Table::new(journal_table, codec.clone()),
            crashes: CrashStore::with_codec(crash_table, codec),
        }
    }

    pub fn crashes(&self) -> &CrashStore<C> {
        &self.crashes
    }

    /// A fresh, empty entry with a new id, started now.
    pub fn new_entry(&self, host: &str, service: &str) -> Entry {
        Entry::new(host, service)
    }

    /// The stored entry. Crash stages carry their text and reference but
    /// not the report itself; see `by_id_with_crash`.
    pub fn by_id(&self, tx: &mut dyn Transaction, id: &str) -> Result<Entry, StoreError> {
        let ulid = parse_id(id)?;
        self.table.get(tx, ulid)?.ok_or_else(|| StoreError::NotFound {
            what: "journal entry",
            id: id.to_string(),
        })
    }

    /// The stored entry with every crash stage's report loaded back in.
    pub fn by_id_with_crash(&self, tx: &mut dyn Transaction, id: &str) -> Result<Entry, StoreError> {
        let mut entry = self.by_id(tx, id)?;

        for stage in &mut entry.chain {
            if stage.entity_type != model_type::CRASH || stage.failure.is_some() {
                continue;
            }

            let report = self
                .crashes
                .by_id(tx, &stage.entity_id)
                .map_err(|e| StoreError::select(format!("crash report of entry {}", id), e))?;
            stage.failure = Some(Box::new(report));
        }

        Ok(entry)
    }

    /// Every entry with a stage referencing `(entity_type, entity_id)`,
    /// most recent first.
    pub fn by_entity(
        &self,
        tx: &mut dyn Transaction,
        entity_type: i32,
        entity_id: &str,
    ) -> Result<Vec<Entry>, StoreError> {
        let value = keys::entity_value(entity_type, entity_id);
        let (low, high) = self.table.keys().prefix_range(JOURNAL_ENTITY, &value);
        let len = keys::timed_key_len(value.len());

        let rows = self
            .table
            .scan_matching(tx, &low, &high, Direction::Reverse, 0, |key| key.len() == len)?;
        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Cursor over entries started in `[from, to]`, most recent first.
    pub fn by_date(
        &self,
        tx: &mut dyn Transaction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        services: &[&str],
    ) -> Result<Cursor<'_, Entry, C>, StoreError> {
        self.open_date_cursor(tx, from, to, page, Direction::Reverse, services)
    }

    /// Cursor over entries started in `[from, to]` in an explicit order.
    pub fn by_date_sorted(
        &self,
        tx: &mut dyn Transaction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        direction: Direction,
        services: &[&str],
    ) -> Result<Cursor<'_, Entry, C>, StoreError> {
        self.open_date_cursor(tx, from, to, page, direction, services)
    }

    /// Cursor over entries started in `[from, to]` with a stage referencing
    /// `(entity_type, entity_id)`.
    #[allow(clippy::too_many_arguments)]
    pub fn by_entity_date(
        &self,
        tx: &mut dyn Transaction,
        entity_type: i32,
        entity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        direction: Direction,
        services: &[&str],
    ) -> Result<Cursor<'_, Entry, C>, StoreError> {
        let value = keys::entity_value(entity_type, entity_id);
        let (low, high) = self.table.keys().window_range(JOURNAL_ENTITY, &value, from, to);

        Cursor::open(
            tx,
            &self.table,
            Query {
                index: JOURNAL_ENTITY,
                low,
                high,
                direction,
                page,
                services: services.iter().map(|s| s.to_string()).collect(),
                key_len: Some(keys::timed_key_len(value.len())),
            },
        )
    }

    /// Resume a saved cursor.
    pub fn cursor(&self, tx: &mut dyn Transaction, id: &str) -> Result<Cursor<'_, Entry, C>, StoreError> {
        Cursor::load(tx, &self.table, id)
    }

    /// Store entries, fully replacing any stored under the same ids. Crash
    /// reports embedded in stages go to the crash table, carrying the
    /// entry's debug values; the stored entry keeps only the references.
    pub fn import(&self, tx: &mut dyn Transaction, entries: &[Entry]) -> Result<(), StoreError> {
        for entry in entries {
            let mut stored = entry.clone();
            let mut reports = Vec::new();

            for stage in &mut stored.chain {
                if let Some(mut report) = stage.failure.take() {
                    stage.entity_type = model_type::CRASH;
                    stage.entity_id = report.id.to_string();
                    report.service = entry.service.clone();
                    if entry.debug.is_some() {
                        report.debug = entry.debug.clone();
                    }
                    reports.push(*report);
                }
            }

            self.crashes
                .import(tx, &reports)
                .map_err(|e| StoreError::insert(format!("crash reports of entry {}", entry.id), e))?;
            self.table.upsert(tx, &stored)?;

            tracing::debug!(entry = %entry.id, crashes = reports.len(), "imported journal entry");
        }
        Ok(())
    }

    /// Remove entries and their index rows. Absent ids are skipped.
    pub fn delete<S: AsRef<str>>(&self, tx: &mut dyn Transaction, ids: &[S]) -> Result<(), StoreError> {
        for id in ids {
            let ulid = parse_id(id.as_ref())?;
            if !self.table.delete(tx, ulid)? {
                tracing::debug!(id = id.as_ref(), "journal entry already absent");
            }
        }
        Ok(())
    }

    /// Load what can be loaded. Malformed, missing or unreadable ids are
    /// logged and left out.
    pub fn load_many<S: AsRef<str>>(&self, tx: &mut dyn Transaction, ids: &[S]) -> Vec<Entry> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.by_id(tx, id.as_ref()) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(id = id.as_ref(), error = %err, "skipping journal entry"),
            }
        }
        entries
    }

    fn open_date_cursor(
        &self,
        tx: &mut dyn Transaction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        direction: Direction,
        services: &[&str],
    ) -> Result<Cursor<'_, Entry, C>, StoreError> {
        let (low, high) = self.table.keys().window_range(JOURNAL_START, &[], from, to);

        Cursor::open(
            tx,
            &self.table,
            Query {
                index: JOURNAL_START,
                low,
                high,
                direction,
                page,
                services: services.iter().map(|s| s.to_string()).collect(),
                key_len: None,
            },
        )
    }
}
