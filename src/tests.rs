#[cfg(test)]
mod tests {
    use crate::cli::Cli;
    use crate::config::PluginConfig;
    use crate::enrich::{MalformedPolicy, enrich_record};
    use crate::identity::{IdentityRequest, resolve_identity};
    use crate::metadata::stub::StubMetadata;
    use crate::plugin::{FlushStatus, OutputPlugin, StackdriverOutput};
    use crate::transport::memory::MemorySink;
    use crate::types::{IdentitySnapshot, Payload, RawRecord, ResourceType};
    use chrono::DateTime;
    use clap::Parser;
    use std::collections::BTreeMap;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

    fn driver_config(flush_size: usize) -> PluginConfig {
        PluginConfig {
            identity: IdentityRequest {
                project: "proj".into(),
                cluster: "clu".into(),
                zone: "z1".into(),
                node: "inst123".into(),
                resource_type: "gke_container".into(),
                ..Default::default()
            },
            flush_size,
            ..PluginConfig::default()
        }
    }

    fn driver_output(
        config: &PluginConfig,
        sink: &MemorySink,
    ) -> StackdriverOutput<StubMetadata, MemorySink> {
        StackdriverOutput::new(config.clone(), StubMetadata::off_gce(), sink.clone())
    }

    fn flushed_payloads(sink: &MemorySink) -> Vec<Vec<Payload>> {
        sink.recorded
            .lock()
            .unwrap()
            .flushed
            .iter()
            .map(|batch| batch.iter().map(|e| e.payload.clone()).collect())
            .collect()
    }

    /// Input that fails on every read.
    struct BrokenInput;

    impl AsyncRead for BrokenInput {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }
    }

    #[test]
    fn test_cli_parsing_identity_flags() {
        let args = vec![
            "stackdriver-out",
            "--project-id",
            "proj",
            "--cluster-name",
            "clu",
            "--zone-override",
            "z1",
            "--node-name",
            "inst123",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.project_id, Some("proj".to_string()));
        assert_eq!(cli.cluster_name, Some("clu".to_string()));
        assert_eq!(cli.zone_override, Some("z1".to_string()));
        assert_eq!(cli.node_name, Some("inst123".to_string()));
        assert!(cli.cluster_location.is_none());
    }

    #[test]
    fn test_cli_parsing_resource_types() {
        let args = vec!["stackdriver-out", "--monitored-resource-types", "k8s"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.monitored_resource_types, Some("k8s".to_string()));
    }

    #[test]
    fn test_cli_parsing_malformed_policy() {
        let args = vec!["stackdriver-out", "--malformed-records", "skip"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.malformed_records, Some(MalformedPolicy::Skip));

        let args = vec!["stackdriver-out", "--malformed-records", "retry"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_parsing_flags() {
        let args = vec!["stackdriver-out", "-v", "--dry-run", "-t", "kube.*"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.verbose);
        assert!(cli.dry_run);
        assert_eq!(cli.tag, Some("kube.*".to_string()));
    }

    #[test]
    fn test_cli_parsing_flush_size() {
        let args = vec!["stackdriver-out", "--flush-size", "100"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.flush_size, Some(100));
    }

    #[test]
    fn test_scenario_container_entry() {
        let identity = IdentitySnapshot {
            project: "proj".into(),
            cluster: "clu".into(),
            cluster_location: String::new(),
            zone: "z1".into(),
            instance: "inst123".into(),
            resource_type: ResourceType::GkeContainer,
        };
        let record = RawRecord::new().with("log", "hello").with(
            "kubernetes",
            RawRecord::new()
                .with("pod_name", "p1")
                .with("namespace_name", "ns1")
                .with("container_name", "c1"),
        );
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let entry = enrich_record(&identity, ts, &record).unwrap();
        assert_eq!(entry.payload, Payload::Text("hello".into()));
        let resource = entry.resource.unwrap();
        assert_eq!(resource.kind, "container");
        assert_eq!(
            resource.labels,
            BTreeMap::from([
                ("project_id".to_string(), "proj".to_string()),
                ("cluster_name".to_string(), "clu".to_string()),
                ("namespace_id".to_string(), "ns1".to_string()),
                ("instance_id".to_string(), "inst123".to_string()),
                ("pod_id".to_string(), "p1".to_string()),
                ("container_name".to_string(), "c1".to_string()),
                ("zone".to_string(), "z1".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn test_scenario_k8s_empty_location_metadata() {
        let metadata = StubMetadata::new()
            .with("project-id", "proj")
            .with("attributes/cluster-name", "clu")
            .with("instance-name", "node-1")
            .with("attributes/cluster-location", "");
        let request = IdentityRequest {
            resource_type: "k8s".into(),
            cluster_location: String::new(),
            ..Default::default()
        };

        let err = resolve_identity(&request, &metadata).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::IdentityError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_discovered_identity() {
        let metadata = StubMetadata::new()
            .with("project-id", "proj")
            .with("attributes/cluster-name", "clu\n")
            .with("instance-name", "inst123")
            .with("zone", "z1");
        let sink = MemorySink::default();
        let mut output = StackdriverOutput::new(PluginConfig::default(), metadata, sink.clone());
        output.init().await.unwrap();

        let data = concat!(
            r#"[1700000000, {"log": "hello", "kubernetes": {"pod_name": "p1", "namespace_name": "ns1", "container_name": "c1"}}]"#,
            "\n",
            r#"[1700000001, {"foo": "bar", "n": 5}]"#,
            "\n",
        );
        assert_eq!(
            output.flush(data.as_bytes(), "kube.var.log").await,
            FlushStatus::Ok
        );

        let recorded = sink.recorded.lock().unwrap();
        let batch = &recorded.flushed[0];
        assert_eq!(batch.len(), 2);

        let labels = &batch[0].resource.as_ref().unwrap().labels;
        assert_eq!(labels["cluster_name"], "clu");
        assert_eq!(labels["zone"], "z1");
        assert_eq!(labels["instance_id"], "inst123");

        assert!(batch[1].resource.is_none());
        assert_eq!(
            batch[1].payload,
            Payload::Fields(BTreeMap::from([
                ("foo".to_string(), "bar".to_string()),
                ("n".to_string(), "Unknown type: i64".to_string()),
            ]))
        );
        assert_eq!(batch[1].timestamp.timestamp(), 1_700_000_001);
    }

    #[tokio::test]
    async fn test_run_splits_input_at_flush_size() {
        let config = driver_config(2);
        let sink = MemorySink::default();
        let input: &[u8] = b"[1, {\"log\": \"a\"}]\n\
            [2, {\"log\": \"b\"}]\n\
            [3, {\"log\": \"c\"}]\n\
            [4, {\"log\": \"d\"}]\n\
            [5, {\"log\": \"e\"}]\n";

        crate::run(
            driver_output(&config, &sink),
            input,
            std::future::pending::<()>(),
            &config,
        )
        .await
        .unwrap();

        let sizes: Vec<_> = flushed_payloads(&sink).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let recorded = sink.recorded.lock().unwrap();
        assert_eq!(recorded.opened_for.as_deref(), Some("proj"));
        assert!(recorded.closed);
    }

    #[tokio::test]
    async fn test_run_empty_input_exits_without_flushing() {
        let config = driver_config(4);
        let sink = MemorySink::default();

        crate::run(
            driver_output(&config, &sink),
            &b""[..],
            std::future::pending::<()>(),
            &config,
        )
        .await
        .unwrap();

        let recorded = sink.recorded.lock().unwrap();
        assert!(recorded.flushed.is_empty());
        assert!(recorded.closed);
    }

    #[tokio::test]
    async fn test_run_keeps_reading_after_non_utf8_line() {
        let config = driver_config(1);
        let sink = MemorySink::default();
        let input: &[u8] = b"[1, {\"log\": \"first\"}]\n\
            [2, {\"log\": \"bad \xff byte\"}]\n\
            [3, {\"log\": \"third\"}]\n";

        crate::run(
            driver_output(&config, &sink),
            input,
            std::future::pending::<()>(),
            &config,
        )
        .await
        .unwrap();

        assert_eq!(
            flushed_payloads(&sink),
            vec![
                vec![Payload::Text("first".into())],
                vec![Payload::Text("third".into())],
            ]
        );
        assert!(sink.recorded.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_run_returns_read_error_after_exit() {
        let config = driver_config(8);
        let sink = MemorySink::default();
        let input = BufReader::new((&b"[1, {\"log\": \"first\"}]\n"[..]).chain(BrokenInput));

        let err = crate::run(
            driver_output(&config, &sink),
            input,
            std::future::pending::<()>(),
            &config,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Failed to read input");
        assert_eq!(
            flushed_payloads(&sink),
            vec![vec![Payload::Text("first".into())]]
        );
        assert!(sink.recorded.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = driver_config(8);
        let sink = MemorySink::default();
        // the writer stays open, so input never reaches EOF
        let (_writer, reader) = tokio::io::duplex(64);

        crate::run(
            driver_output(&config, &sink),
            BufReader::new(reader),
            std::future::ready(()),
            &config,
        )
        .await
        .unwrap();

        let recorded = sink.recorded.lock().unwrap();
        assert!(recorded.flushed.is_empty());
        assert!(recorded.closed);
    }
}
