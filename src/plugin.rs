use crate::config::PluginConfig;
use crate::decoder::RecordDecoder;
use crate::enrich::{MalformedPolicy, enrich_record};
use crate::error::{FlushError, IdentityError, TransportError};
use crate::identity::resolve_identity;
use crate::metadata::MetadataService;
use crate::transport::LogSink;
use crate::types::IdentitySnapshot;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const PLUGIN_NAME: &str = "stackdriver";
pub const PLUGIN_DESCRIPTION: &str = "Output plugin for Stackdriver";

/// Outcome of a flush, as reported to the collection agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Data has been processed.
    Ok,
    /// Unrecoverable, do not try this batch again.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to create client: {0}")]
    Sink(#[from] TransportError),
}

/// Lifecycle hooks the collection agent drives.
pub trait OutputPlugin {
    fn register() -> Registration
    where
        Self: Sized;
    async fn init(&mut self) -> Result<(), InitError>;
    async fn flush(&mut self, data: &[u8], tag: &str) -> FlushStatus;
    async fn exit(&mut self) -> FlushStatus;
}

/// State built once by `init` and read by every flush.
#[derive(Debug, Clone)]
pub struct FlushContext {
    pub identity: Arc<IdentitySnapshot>,
    pub malformed: MalformedPolicy,
}

pub struct StackdriverOutput<M, S> {
    config: PluginConfig,
    metadata: M,
    sink: S,
    context: Option<FlushContext>,
}

impl<M: MetadataService, S: LogSink> StackdriverOutput<M, S> {
    pub fn new(config: PluginConfig, metadata: M, sink: S) -> Self {
        Self {
            config,
            metadata,
            sink,
            context: None,
        }
    }

    #[cfg(test)]
    pub fn context(&self) -> Option<&FlushContext> {
        self.context.as_ref()
    }

    async fn process(&mut self, ctx: &FlushContext, data: &[u8]) -> Result<usize, FlushError> {
        let mut entries = Vec::new();
        for (timestamp, record) in RecordDecoder::new(data) {
            match enrich_record(&ctx.identity, timestamp, &record) {
                Ok(entry) => entries.push(entry),
                Err(e) => match ctx.malformed {
                    MalformedPolicy::Abort => return Err(e.into()),
                    MalformedPolicy::Skip => {
                        warn!("Skipping record: {}", e);
                    }
                },
            }
        }

        let count = entries.len();
        for entry in entries {
            self.sink.log(entry);
        }
        self.sink.flush().await?;
        Ok(count)
    }
}

impl<M: MetadataService, S: LogSink> OutputPlugin for StackdriverOutput<M, S> {
    fn register() -> Registration {
        Registration {
            name: PLUGIN_NAME,
            description: PLUGIN_DESCRIPTION,
        }
    }

    async fn init(&mut self) -> Result<(), InitError> {
        let identity = resolve_identity(&self.config.identity, &self.metadata).await?;
        self.sink.open(&identity)?;
        info!(
            "Stackdriver plugin is configured for project: {}, cluster-name: {}, instance: {}, resource-type: {}",
            identity.project, identity.cluster, identity.instance, identity.resource_type
        );
        self.context = Some(FlushContext {
            identity: Arc::new(identity),
            malformed: self.config.malformed_records,
        });
        Ok(())
    }

    async fn flush(&mut self, data: &[u8], tag: &str) -> FlushStatus {
        let Some(ctx) = self.context.clone() else {
            error!("Flush for tag {} called before the plugin was initialized", tag);
            return FlushStatus::Error;
        };

        match self.process(&ctx, data).await {
            Ok(count) => {
                debug!("Flushed {} entries for tag {}", count, tag);
                FlushStatus::Ok
            }
            Err(e) => {
                error!("Flush for tag {} failed: {}", tag, e);
                e.status()
            }
        }
    }

    async fn exit(&mut self) -> FlushStatus {
        if let Err(e) = self.sink.close().await {
            error!("Failed to close client: {}", e);
        }
        self.context = None;
        FlushStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRequest;
    use crate::metadata::stub::StubMetadata;
    use crate::transport::memory::MemorySink;
    use crate::types::Payload;

    fn explicit_config(malformed: MalformedPolicy) -> PluginConfig {
        PluginConfig {
            identity: IdentityRequest {
                project: "proj".into(),
                cluster: "clu".into(),
                zone: "z1".into(),
                node: "inst123".into(),
                resource_type: "gke_container".into(),
                ..Default::default()
            },
            malformed_records: malformed,
            ..PluginConfig::default()
        }
    }

    async fn initialized(
        malformed: MalformedPolicy,
        sink: MemorySink,
    ) -> StackdriverOutput<StubMetadata, MemorySink> {
        let mut plugin =
            StackdriverOutput::new(explicit_config(malformed), StubMetadata::off_gce(), sink);
        plugin.init().await.unwrap();
        plugin
    }

    const BATCH_WITH_MALFORMED: &[u8] = b"[1, {\"log\": \"first\"}]\n\
        [2, {\"log\": \"bad\", \"kubernetes\": \"oops\"}]\n\
        [3, {\"log\": \"third\"}]\n";

    #[test]
    fn test_register() {
        let reg = StackdriverOutput::<StubMetadata, MemorySink>::register();
        assert_eq!(reg.name, "stackdriver");
        assert_eq!(reg.description, "Output plugin for Stackdriver");
    }

    #[tokio::test]
    async fn test_init_opens_sink_with_identity() {
        let sink = MemorySink::default();
        let plugin = initialized(MalformedPolicy::Abort, sink.clone()).await;
        assert_eq!(
            sink.recorded.lock().unwrap().opened_for.as_deref(),
            Some("proj")
        );
        assert_eq!(plugin.context().unwrap().identity.zone, "z1");
    }

    #[tokio::test]
    async fn test_init_failure_leaves_plugin_unusable() {
        let config = PluginConfig {
            identity: IdentityRequest {
                resource_type: "k8s".into(),
                ..Default::default()
            },
            ..PluginConfig::default()
        };
        let sink = MemorySink::default();
        let mut plugin = StackdriverOutput::new(config, StubMetadata::off_gce(), sink.clone());

        let err = plugin.init().await.unwrap_err();
        assert!(matches!(err, InitError::Identity(IdentityError::Environment(_))));
        assert!(sink.recorded.lock().unwrap().opened_for.is_none());
        assert_eq!(plugin.flush(b"[1, {}]", "t").await, FlushStatus::Error);
    }

    #[tokio::test]
    async fn test_flush_sends_whole_batch() {
        let sink = MemorySink::default();
        let mut plugin = initialized(MalformedPolicy::Abort, sink.clone()).await;

        let data = b"[1, {\"log\": \"a\"}]\n[2, {\"log\": \"b\"}]\n";
        assert_eq!(plugin.flush(data, "kube.var.log").await, FlushStatus::Ok);

        let recorded = sink.recorded.lock().unwrap();
        assert_eq!(recorded.flushed.len(), 1);
        let payloads: Vec<_> = recorded.flushed[0].iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![Payload::Text("a".into()), Payload::Text("b".into())]
        );
    }

    #[tokio::test]
    async fn test_malformed_kubernetes_aborts_batch() {
        let sink = MemorySink::default();
        let mut plugin = initialized(MalformedPolicy::Abort, sink.clone()).await;

        assert_eq!(
            plugin.flush(BATCH_WITH_MALFORMED, "kube").await,
            FlushStatus::Error
        );
        // nothing from the batch is sent, including the record before the bad one
        assert!(sink.recorded.lock().unwrap().flushed.is_empty());

        // the plugin stays usable for the next batch
        assert_eq!(plugin.flush(b"[4, {\"log\": \"d\"}]", "kube").await, FlushStatus::Ok);
        assert_eq!(sink.recorded.lock().unwrap().flushed[0].len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_kubernetes_skip_policy() {
        let sink = MemorySink::default();
        let mut plugin = initialized(MalformedPolicy::Skip, sink.clone()).await;

        assert_eq!(
            plugin.flush(BATCH_WITH_MALFORMED, "kube").await,
            FlushStatus::Ok
        );
        let recorded = sink.recorded.lock().unwrap();
        let payloads: Vec<_> = recorded.flushed[0].iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![Payload::Text("first".into()), Payload::Text("third".into())]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_batch_error() {
        let mut plugin = initialized(MalformedPolicy::Abort, MemorySink::failing()).await;
        assert_eq!(
            plugin.flush(b"[1, {\"log\": \"a\"}]", "kube").await,
            FlushStatus::Error
        );
    }

    #[tokio::test]
    async fn test_exit_closes_sink() {
        let sink = MemorySink::default();
        let mut plugin = initialized(MalformedPolicy::Abort, sink.clone()).await;
        assert_eq!(plugin.exit().await, FlushStatus::Ok);
        assert!(sink.recorded.lock().unwrap().closed);
        assert_eq!(plugin.flush(b"[1, {}]", "t").await, FlushStatus::Error);
    }
}
