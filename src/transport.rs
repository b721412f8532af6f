use crate::error::TransportError;
use crate::types::{IdentitySnapshot, LogEntry, MonitoredResource};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com/v2/entries:write";

/// Destination for enriched entries. `log` only buffers; `flush` sends.
pub trait LogSink {
    fn open(&mut self, identity: &IdentitySnapshot) -> Result<(), TransportError>;
    fn log(&mut self, entry: LogEntry);
    async fn flush(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
    log_name: &'a str,
    resource: &'a MonitoredResource,
    entries: &'a [LogEntry],
}

struct OpenTarget {
    client: Client,
    log_name: String,
    resource: MonitoredResource,
}

/// Writes entries to the Cloud Logging `entries:write` endpoint.
pub struct CloudLoggingClient {
    endpoint: String,
    log_id: String,
    timeout: Duration,
    target: Option<OpenTarget>,
    buffer: Vec<LogEntry>,
}

impl CloudLoggingClient {
    pub fn new(endpoint: impl Into<String>, log_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            log_id: log_id.into(),
            timeout,
            target: None,
            buffer: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl LogSink for CloudLoggingClient {
    fn open(&mut self, identity: &IdentitySnapshot) -> Result<(), TransportError> {
        let client = Client::builder().timeout(self.timeout).build()?;
        self.target = Some(OpenTarget {
            client,
            log_name: log_name(&identity.project, &self.log_id),
            resource: global_resource(&identity.project),
        });
        Ok(())
    }

    fn log(&mut self, entry: LogEntry) {
        self.buffer.push(entry);
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let target = self.target.as_ref().ok_or(TransportError::NotOpen)?;
        let entries = std::mem::take(&mut self.buffer);
        if entries.is_empty() {
            return Ok(());
        }

        debug!("Writing {} entries to {}", entries.len(), target.log_name);
        let request = WriteRequest {
            log_name: &target.log_name,
            resource: &target.resource,
            entries: &entries,
        };
        let resp = target
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let result = self.flush().await;
        self.target = None;
        result
    }
}

/// Dry-run sink printing each flushed entry as a JSON line.
#[derive(Default)]
pub struct StdoutSink {
    buffer: Vec<LogEntry>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for StdoutSink {
    fn open(&mut self, _identity: &IdentitySnapshot) -> Result<(), TransportError> {
        Ok(())
    }

    fn log(&mut self, entry: LogEntry) {
        self.buffer.push(entry);
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let entries = std::mem::take(&mut self.buffer);
        let mut stdout = std::io::stdout().lock();
        for entry in &entries {
            serde_json::to_writer(&mut stdout, entry)?;
            stdout.write_all(b"\n")?;
        }
        stdout.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.flush().await
    }
}

fn log_name(project: &str, log_id: &str) -> String {
    format!("projects/{}/logs/{}", project, log_id.replace('/', "%2F"))
}

fn global_resource(project: &str) -> MonitoredResource {
    MonitoredResource {
        kind: "global".to_string(),
        labels: BTreeMap::from([("project_id".to_string(), project.to_string())]),
    }
}
