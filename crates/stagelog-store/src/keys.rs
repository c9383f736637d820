// ABOUTME: Byte layout of primary, secondary index, and saved cursor keys for one table.
// ABOUTME: Fixed-width big-endian timestamps follow the discriminator so byte order is time order.

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Namespace of primary rows within a table.
pub const PRIMARY: u16 = 0;

/// Namespace of saved cursor states within a table.
pub const CURSORS: u16 = 0xFFFF;

/// Journal index: entry start time.
pub const JOURNAL_START: u16 = 1;

/// Journal index: referenced entity, then start time.
pub const JOURNAL_ENTITY: u16 = 2;

/// Crash index: creation time.
pub const CRASH_DATE: u16 = 1;

/// Crash index: lower-cased code, then creation time.
pub const CRASH_CODE: u16 = 2;

/// Length of the table and namespace prefix.
pub const NAMESPACE_LEN: usize = 4;

pub const TIMESTAMP_LEN: usize = 8;

pub const ID_LEN: usize = 16;

/// Builds keys for one table:
///
/// - primary row: `table ‖ 0x0000 ‖ id`
/// - index row: `table ‖ index ‖ value ‖ id`
/// - saved cursor: `table ‖ 0xFFFF ‖ cursor id`
///
/// `table` and `index` are big-endian u16, ids are the 16 raw ULID bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBuilder {
    table: u16,
}

impl KeyBuilder {
    pub fn new(table: u16) -> Self {
        Self { table }
    }

    pub fn table(&self) -> u16 {
        self.table
    }

    pub fn namespace(&self, space: u16) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(&self.table.to_be_bytes());
        key.extend_from_slice(&space.to_be_bytes());
        key
    }

    pub fn primary(&self, id: Ulid) -> Vec<u8> {
        let mut key = self.namespace(PRIMARY);
        key.extend_from_slice(&id.to_bytes());
        key
    }

    /// Range covering every primary row of the table.
    pub fn primary_range(&self) -> (Vec<u8>, Vec<u8>) {
        let low = self.namespace(PRIMARY);
        let high = prefix_end(&low);
        (low, high)
    }

    pub fn index(&self, index: u16, value: &[u8], id: Ulid) -> Vec<u8> {
        let mut key = self.index_prefix(index, value);
        key.extend_from_slice(&id.to_bytes());
        key
    }

    pub fn index_prefix(&self, index: u16, value: &[u8]) -> Vec<u8> {
        let mut key = self.namespace(index);
        key.extend_from_slice(value);
        key
    }

    pub fn cursor(&self, id: Ulid) -> Vec<u8> {
        let mut key = self.namespace(CURSORS);
        key.extend_from_slice(&id.to_bytes());
        key
    }

    /// `[low, high)` over index rows whose value starts with `value`.
    pub fn prefix_range(&self, index: u16, value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let low = self.index_prefix(index, value);
        let high = prefix_end(&low);
        (low, high)
    }

    /// `[low, high)` over index rows whose value is `value ‖ timestamp` with
    /// the timestamp inside `[from, to]`.
    pub fn window_range(
        &self,
        index: u16,
        value: &[u8],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (Vec<u8>, Vec<u8>) {
        let mut low = self.index_prefix(index, value);
        low.extend_from_slice(&timestamp(from));

        let mut high = self.index_prefix(index, value);
        high.extend_from_slice(&nanos(to).saturating_add(1).to_be_bytes());

        (low, high)
    }
}

/// The record id stored in the trailing bytes of a primary or index key.
pub fn id_of(key: &[u8]) -> Option<Ulid> {
    let tail = key.len().checked_sub(ID_LEN)?;
    let bytes: [u8; ID_LEN] = key[tail..].try_into().ok()?;
    Some(Ulid::from_bytes(bytes))
}

/// The timestamp stored just before the id of an index key whose value
/// ends with a timestamp.
pub fn timestamp_of(key: &[u8]) -> Option<u64> {
    let end = key.len().checked_sub(ID_LEN)?;
    let start = end.checked_sub(TIMESTAMP_LEN)?;
    if start < NAMESPACE_LEN {
        return None;
    }
    let bytes: [u8; TIMESTAMP_LEN] = key[start..end].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// UTC nanoseconds since the epoch, clamped to zero before it and to
/// `i64::MAX` past the representable range.
pub fn nanos(t: DateTime<Utc>) -> u64 {
    let nanos = t.timestamp_nanos_opt().unwrap_or(if t.timestamp() < 0 {
        0
    } else {
        i64::MAX
    });
    u64::try_from(nanos).unwrap_or(0)
}

pub fn timestamp(t: DateTime<Utc>) -> [u8; TIMESTAMP_LEN] {
    nanos(t).to_be_bytes()
}

/// Index value of a stage reference: `type ‖ id`.
pub fn entity_value(entity_type: i32, entity_id: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + entity_id.len() + TIMESTAMP_LEN);
    value.extend_from_slice(&entity_type.to_be_bytes());
    value.extend_from_slice(entity_id.as_bytes());
    value
}

/// Index value of a crash code: its lower-cased bytes.
pub fn code_value(code: &str) -> Vec<u8> {
    code.to_lowercase().into_bytes()
}

/// Length of a full index key whose value is `value_len` bytes followed by
/// a timestamp.
pub fn timed_key_len(value_len: usize) -> usize {
    NAMESPACE_LEN + value_len + TIMESTAMP_LEN + ID_LEN
}

/// Smallest key greater than every key starting with `prefix`, or an empty
/// key (unbounded) when no such key exists.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return end;
        }
    }
    Vec::new()
}
