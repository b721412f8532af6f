use crate::error::MalformedRecord;
use crate::types::{IdentitySnapshot, LogEntry, MonitoredResource, Payload, RawRecord, ValueKind};
use crate::utils::{stringify, stringify_fields};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const KUBERNETES_FIELD: &str = "kubernetes";
pub const LOG_FIELD: &str = "log";
pub const CONTAINER_RESOURCE_TYPE: &str = "container";

/// What a flush does with a record whose `kubernetes` field is not a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the whole batch.
    #[default]
    Abort,
    /// Drop the record and keep going.
    Skip,
}

/// Turn one raw record into a log entry labelled with the workload identity.
pub fn enrich_record(
    identity: &IdentitySnapshot,
    timestamp: DateTime<Utc>,
    record: &RawRecord,
) -> Result<LogEntry, MalformedRecord> {
    let mut resource = None;
    let mut payload = None;

    for (key, value) in record.iter() {
        match key.as_field_name() {
            Some(KUBERNETES_FIELD) if resource.is_none() => match value.kind() {
                ValueKind::Map(pod) => resource = Some(container_resource(identity, pod)),
                _ => {
                    return Err(MalformedRecord {
                        found: value.type_name(),
                    });
                }
            },
            Some(LOG_FIELD) => payload = Some(Payload::Text(stringify(value))),
            _ => {}
        }
    }

    Ok(LogEntry {
        timestamp,
        resource,
        payload: payload.unwrap_or_else(|| Payload::Fields(stringify_fields(record))),
    })
}

fn container_resource(identity: &IdentitySnapshot, pod: &RawRecord) -> MonitoredResource {
    let mut container_name = String::new();
    let mut pod_id = String::new();
    let mut namespace_id = String::new();

    for (key, value) in pod.iter() {
        match key.as_field_name() {
            Some("container_name") => container_name = stringify(value),
            Some("pod_name") => pod_id = stringify(value),
            Some("namespace_name") => namespace_id = stringify(value),
            _ => {}
        }
    }

    let labels = BTreeMap::from([
        ("project_id".to_string(), identity.project.clone()),
        ("cluster_name".to_string(), identity.cluster.clone()),
        ("namespace_id".to_string(), namespace_id),
        ("instance_id".to_string(), identity.instance.clone()),
        ("pod_id".to_string(), pod_id),
        ("container_name".to_string(), container_name),
        ("zone".to_string(), identity.zone.clone()),
    ]);

    MonitoredResource {
        kind: CONTAINER_RESOURCE_TYPE.to_string(),
        labels,
    }
}
