// ABOUTME: Record codec seam used by the storage engines to turn records into stored bytes.
// ABOUTME: JsonCodec is the default implementation, backed by serde_json.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes and decodes stored records. Implementations must round-trip
/// every field exactly.
pub trait RecordCodec: Clone + Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use stagelog_core::crash::{CrashReport, ReportEntry};
    use stagelog_core::entry::{Entry, Stage};

    #[test]
    fn entry_with_failure_survives_codec() {
        let report = CrashReport {
            id: ulid::Ulid::new(),
            code: "bill4041".to_string(),
            link: String::new(),
            title: "Not found".to_string(),
            status: 404,
            service: "bill".to_string(),
            created: chrono::Utc::now(),
            entries: vec![ReportEntry {
                text: "invoice missing".to_string(),
                detail: "check the number".to_string(),
                stack: vec!["frame 0".to_string()],
                debug: BTreeMap::from([("id".to_string(), "7".to_string())]),
            }],
            debug: None,
        };

        let mut entry = Entry::new("host", "bill");
        entry.total = Duration::from_nanos(1_234_567);
        entry.chain.push(Stage::text("start"));
        entry.chain.push(Stage::failure(report));

        let codec = JsonCodec;
        let bytes = codec.encode(&entry).unwrap();
        let back: Entry = codec.decode(&bytes).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn decode_garbage_is_an_error() {
        let result: Result<Entry, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
