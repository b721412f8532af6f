use crate::cli::Cli;
use crate::enrich::MalformedPolicy;
use crate::identity::IdentityRequest;
use crate::transport::DEFAULT_ENDPOINT;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RESOURCE_TYPES: &str = "gke_container";
pub const DEFAULT_LOG_NAME: &str = "k8s";
pub const DEFAULT_FLUSH_SIZE: usize = 512;
pub const DEFAULT_TAG: &str = "stdin";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings read from the YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub project_id: Option<String>,
    pub cluster_name: Option<String>,
    pub cluster_location: Option<String>,
    pub zone: Option<String>,
    pub node_name: Option<String>,
    pub monitored_resource_types: Option<String>,
    pub log_name: Option<String>,
    pub endpoint: Option<String>,
    pub flush_size: Option<usize>,
    pub tag: Option<String>,
    pub malformed_records: Option<MalformedPolicy>,
    pub metadata_host: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub identity: IdentityRequest,
    pub log_name: String,
    pub endpoint: String,
    pub flush_size: usize,
    pub tag: String,
    pub malformed_records: MalformedPolicy,
    pub metadata_host: Option<String>,
    pub request_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            identity: IdentityRequest {
                resource_type: DEFAULT_RESOURCE_TYPES.to_string(),
                ..Default::default()
            },
            log_name: DEFAULT_LOG_NAME.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            flush_size: DEFAULT_FLUSH_SIZE,
            tag: DEFAULT_TAG.to_string(),
            malformed_records: MalformedPolicy::default(),
            metadata_host: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl PluginConfig {
    /// Load the config file named by the CLI, if any, and apply flags on top.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    pub fn merge(cli: &Cli, file: FileConfig) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let pick = |flag: &Option<String>, file: Option<String>| {
            flag.clone().or(file).unwrap_or_default()
        };

        let identity = IdentityRequest {
            project: pick(&cli.project_id, file.project_id),
            cluster: pick(&cli.cluster_name, file.cluster_name),
            cluster_location: pick(&cli.cluster_location, file.cluster_location),
            zone: pick(&cli.zone_override, file.zone),
            node: pick(&cli.node_name, file.node_name),
            resource_type: cli
                .monitored_resource_types
                .clone()
                .or(file.monitored_resource_types)
                .unwrap_or(defaults.identity.resource_type),
        };

        let flush_size = cli
            .flush_size
            .or(file.flush_size)
            .unwrap_or(defaults.flush_size);
        if flush_size == 0 {
            anyhow::bail!("flush-size must be at least 1");
        }

        Ok(Self {
            identity,
            log_name: cli.log_name.clone().or(file.log_name).unwrap_or(defaults.log_name),
            endpoint: cli.endpoint.clone().or(file.endpoint).unwrap_or(defaults.endpoint),
            flush_size,
            tag: cli.tag.clone().or(file.tag).unwrap_or(defaults.tag),
            malformed_records: cli
                .malformed_records
                .or(file.malformed_records)
                .unwrap_or(defaults.malformed_records),
            metadata_host: cli.metadata_host.clone().or(file.metadata_host),
            request_timeout: cli
                .request_timeout_secs
                .or(file.request_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }
}
