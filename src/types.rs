use serde::Serialize;
use std::collections::BTreeMap;

/// A single value decoded from a collection-agent record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Str(String),
    Bytes(Vec<u8>),
    Map(RawRecord),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Array(Vec<RecordValue>),
    Nil,
}

/// Classification of a value before any business rule looks at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    Map(&'a RawRecord),
    Other(&'static str),
}

impl RecordValue {
    pub fn kind(&self) -> ValueKind<'_> {
        match self {
            Self::Str(s) => ValueKind::Text(s),
            Self::Bytes(b) => ValueKind::Bytes(b),
            Self::Map(m) => ValueKind::Map(m),
            other => ValueKind::Other(other.type_name()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Map(_) => "map",
            Self::Int(_) => "i64",
            Self::UInt(_) => "u64",
            Self::Float(_) => "f64",
            Self::Bool(_) => "bool",
            Self::Array(_) => "array",
            Self::Nil => "nil",
        }
    }

    /// Field name as text, for keys that are strings or raw bytes.
    pub fn as_field_name(&self) -> Option<&str> {
        match self.kind() {
            ValueKind::Text(s) => Some(s),
            ValueKind::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

impl From<&str> for RecordValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for RecordValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<RawRecord> for RecordValue {
    fn from(m: RawRecord) -> Self {
        Self::Map(m)
    }
}

/// Unordered field mapping as delivered by the collection agent. Keys are
/// untrusted and need not be strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(RecordValue, RecordValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<RecordValue>, value: impl Into<RecordValue>) {
        self.fields.push((key.into(), value.into()));
    }

    #[cfg(test)]
    pub fn with(mut self, key: impl Into<RecordValue>, value: impl Into<RecordValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordValue, &RecordValue)> {
        self.fields.iter().map(|(k, v)| (k, v))
    }
}

/// Structured descriptor the backend uses to group entries by workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Payload {
    #[serde(rename = "textPayload")]
    Text(String),
    #[serde(rename = "jsonPayload")]
    Fields(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<MonitoredResource>,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    K8s,
    GkeContainer,
    /// Accepted only when the identity was supplied explicitly.
    Other(String),
}

impl ResourceType {
    pub fn parse(s: &str) -> Self {
        match s {
            "k8s" => Self::K8s,
            "gke_container" => Self::GkeContainer,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::K8s => "k8s",
            Self::GkeContainer => "gke_container",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workload identity resolved once at init and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub project: String,
    pub cluster: String,
    pub cluster_location: String,
    pub zone: String,
    pub instance: String,
    pub resource_type: ResourceType,
}
