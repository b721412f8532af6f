use crate::types::{RawRecord, RecordValue, ValueKind};
use std::collections::BTreeMap;

/// Placeholder emitted for values that have no textual form. Never fails, so
/// an unexpected field type cannot stop the pipeline.
pub fn unknown_type(type_name: &str) -> String {
    format!("Unknown type: {}", type_name)
}

/// Convert a record value to text.
pub fn stringify(value: &RecordValue) -> String {
    match value.kind() {
        ValueKind::Text(s) => s.to_string(),
        ValueKind::Bytes(b) => bytes_to_string(b),
        ValueKind::Map(_) => unknown_type(value.type_name()),
        ValueKind::Other(name) => unknown_type(name),
    }
}

/// Bytes are taken as text without validation: UTF-8 passes through, anything
/// else maps one byte to one character.
pub fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Flatten every top-level field of a record into a string map.
pub fn stringify_fields(record: &RawRecord) -> BTreeMap<String, String> {
    record
        .iter()
        .map(|(k, v)| (stringify(k), stringify(v)))
        .collect()
}
