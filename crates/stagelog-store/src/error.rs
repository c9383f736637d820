// ABOUTME: Error taxonomy shared by the storage engines and the cursor engine.
// ABOUTME: Separates malformed input and absent records from wrapped backend and codec failures.

use std::error::Error as StdError;

use thiserror::Error;

use crate::kv::KvError;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by `JournalStore`, `CrashStore` and `Cursor`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid id {id:?}: {source}")]
    InvalidId {
        id: String,
        #[source]
        source: ulid::DecodeError,
    },

    #[error("invalid query: {0}")]
    Validation(String),

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("select failed ({context}): {source}")]
    Select {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("insert failed ({context}): {source}")]
    Insert {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("delete failed ({context}): {source}")]
    Delete {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("storage backend error: {0}")]
    Backend(#[from] KvError),
}

impl StoreError {
    pub fn select(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Select {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn insert(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Insert {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn delete(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Delete {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Parse a record or cursor id, mapping failures to `InvalidId`.
pub fn parse_id(id: &str) -> Result<ulid::Ulid, StoreError> {
    ulid::Ulid::from_string(id).map_err(|source| StoreError::InvalidId {
        id: id.to_string(),
        source,
    })
}
