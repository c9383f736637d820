// ABOUTME: Storage engine for crash reports, indexed by creation time and by lower-cased code.
// ABOUTME: Supports exact-code, code-prefix and time-window lookups plus resumable date cursors.

use chrono::{DateTime, Utc};
use stagelog_core::crash::CrashReport;
use ulid::Ulid;

use crate::codec::{JsonCodec, RecordCodec};
use crate::cursor::{Cursor, Query};
use crate::error::{StoreError, parse_id};
use crate::keys::{self, CRASH_CODE, CRASH_DATE};
use crate::kv::{Direction, Transaction};
use crate::table::{Record, Table};

impl Record for CrashReport {
    const KIND: &'static str = "crash report";

    fn id(&self) -> Ulid {
        self.id
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn indexes(&self) -> Vec<(u16, Vec<u8>)> {
        let created = keys::timestamp(self.created);

        let mut code = keys::code_value(&self.code);
        code.extend_from_slice(&created);

        vec![(CRASH_DATE, created.to_vec()), (CRASH_CODE, code)]
    }
}

/// Crash reports under one table id.
#[derive(Debug, Clone)]
pub struct CrashStore<C = JsonCodec> {
    table: Table<CrashReport, C>,
}

impl CrashStore<JsonCodec> {
    pub fn new(table: u16) -> Self {
        Self::with_codec(table, JsonCodec)
    }
}

impl<C: RecordCodec> CrashStore<C> {
    pub fn with_codec(table: u16, codec: C) -> Self {
        Self {
            table: Table::new(table, codec),
        }
    }

    pub fn table_id(&self) -> u16 {
        self.table.keys().table()
    }

    /// A fresh report, created now, with no entries.
    pub fn new_report(&self, service: &str, code: &str, title: &str, status: u16) -> CrashReport {
        CrashReport {
            id: Ulid::new(),
            code: code.to_string(),
            link: String::new(),
            title: title.to_string(),
            status,
            service: service.to_string(),
            created: Utc::now(),
            entries: Vec::new(),
            debug: None,
        }
    }

    pub fn by_id(&self, tx: &mut dyn Transaction, id: &str) -> Result<CrashReport, StoreError> {
        let ulid = parse_id(id)?;
        self.table.get(tx, ulid)?.ok_or_else(|| StoreError::NotFound {
            what: "crash report",
            id: id.to_string(),
        })
    }

    /// Every report with exactly `code` (case-insensitive), most recent first.
    pub fn by_code(&self, tx: &mut dyn Transaction, code: &str) -> Result<Vec<CrashReport>, StoreError> {
        let value = keys::code_value(code);
        let (low, high) = self.table.keys().prefix_range(CRASH_CODE, &value);
        let len = keys::timed_key_len(value.len());

        let rows = self
            .table
            .scan_matching(tx, &low, &high, Direction::Reverse, 0, |key| key.len() == len)?;
        Ok(rows.into_iter().map(|(_, report)| report).collect())
    }

    /// Reports created in `[from, to]` with exactly `code`, or with any
    /// code when `code` is empty. Most recent first.
    pub fn by_date_code(
        &self,
        tx: &mut dyn Transaction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: &str,
    ) -> Result<Vec<CrashReport>, StoreError> {
        let rows = if code.is_empty() {
            let (low, high) = self.table.keys().window_range(CRASH_DATE, &[], from, to);
            self.table.scan(tx, &low, &high, Direction::Reverse, 0)?
        } else {
            let value = keys::code_value(code);
            let (low, high) = self.table.keys().window_range(CRASH_CODE, &value, from, to);
            let len = keys::timed_key_len(value.len());
            self.table
                .scan_matching(tx, &low, &high, Direction::Reverse, 0, |key| key.len() == len)?
        };

        Ok(rows.into_iter().map(|(_, report)| report).collect())
    }

    /// Reports whose code starts with `prefix` (case-insensitive), created
    /// in `[from, to]`. Ordered by code, then creation time.
    pub fn by_code_prefix(
        &self,
        tx: &mut dyn Transaction,
        prefix: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CrashReport>, StoreError> {
        let (low, high) = self
            .table
            .keys()
            .prefix_range(CRASH_CODE, &keys::code_value(prefix));
        let (from, to) = (keys::nanos(from), keys::nanos(to));

        let rows = self.table.scan_matching(tx, &low, &high, Direction::Forward, 0, |key| {
            keys::timestamp_of(key).is_some_and(|t| from <= t && t <= to)
        })?;
        Ok(rows.into_iter().map(|(_, report)| report).collect())
    }

    /// Cursor over reports created in `[from, to]`, most recent first.
    pub fn by_date(
        &self,
        tx: &mut dyn Transaction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        services: &[&str],
    ) -> Result<Cursor<'_, CrashReport, C>, StoreError> {
        let (low, high) = self.table.keys().window_range(CRASH_DATE, &[], from, to);
        Cursor::open(
            tx,
            &self.table,
            Query {
                index: CRASH_DATE,
                low,
                high,
                direction: Direction::Reverse,
                page,
                services: services.iter().map(|s| s.to_string()).collect(),
                key_len: None,
            },
        )
    }

    /// Cursor over reports with exactly `code` created in `[from, to]`,
    /// most recent first.
    pub fn by_code_date(
        &self,
        tx: &mut dyn Transaction,
        code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        services: &[&str],
    ) -> Result<Cursor<'_, CrashReport, C>, StoreError> {
        let value = keys::code_value(code);
        let (low, high) = self.table.keys().window_range(CRASH_CODE, &value, from, to);
        Cursor::open(
            tx,
            &self.table,
            Query {
                index: CRASH_CODE,
                low,
                high,
                direction: Direction::Reverse,
                page,
                services: services.iter().map(|s| s.to_string()).collect(),
                key_len: Some(keys::timed_key_len(value.len())),
            },
        )
    }

    pub fn cursor(
        &self,
        tx: &mut dyn Transaction,
        id: &str,
    ) -> Result<Cursor<'_, CrashReport, C>, StoreError> {
        Cursor::load(tx, &self.table, id)
    }

    /// Store reports, fully replacing any stored under the same ids.
    pub fn import(&self, tx: &mut dyn Transaction, reports: &[CrashReport]) -> Result<(), StoreError> {
        for report in reports {
            self.table.upsert(tx, report)?;
        }
        Ok(())
    }

    /// Remove reports. Absent ids are skipped.
    pub fn delete<S: AsRef<str>>(&self, tx: &mut dyn Transaction, ids: &[S]) -> Result<(), StoreError> {
        for id in ids {
            let ulid = parse_id(id.as_ref())?;
            if !self.table.delete(tx, ulid)? {
                tracing::debug!(id = id.as_ref(), "crash report already absent");
            }
        }
        Ok(())
    }
}
