// ABOUTME: Persistence layer for stagelog, storing journal entries and crash reports in ordered key-value stores.
// ABOUTME: Provides memory and SQLite backends, composite index keys, storage engines, and resumable cursors.

pub mod codec;
pub mod crash;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod journal;
pub mod keys;
pub mod kv;
pub mod table;

pub use codec::{CodecError, JsonCodec, RecordCodec};
pub use crash::CrashStore;
pub use cursor::{Cursor, CursorState, Query};
pub use driver::StoreDriver;
pub use error::StoreError;
pub use journal::JournalStore;
pub use kv::{Database, Direction, KvError, MemoryDatabase, SqliteDatabase, Transaction};
pub use table::{Record, Table};
