use crate::enrich::MalformedPolicy;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stackdriver-out")]
#[command(about = "Forward collection-agent log records to Stackdriver with workload identity")]
pub struct Cli {
    /// YAML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project id; when set, identity is taken from flags only
    #[arg(long)]
    pub project_id: Option<String>,

    /// Cluster name
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Cluster location, required by k8s resources
    #[arg(long)]
    pub cluster_location: Option<String>,

    /// Zone, required by gke_container resources
    #[arg(long)]
    pub zone_override: Option<String>,

    /// Node (instance) name
    #[arg(long)]
    pub node_name: Option<String>,

    /// Monitored resource types (k8s or gke_container)
    #[arg(long)]
    pub monitored_resource_types: Option<String>,

    /// Log id entries are written under
    #[arg(long)]
    pub log_name: Option<String>,

    /// Logging API entries:write endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Maximum records per flush
    #[arg(long)]
    pub flush_size: Option<usize>,

    /// Tag reported with each flush
    #[arg(short, long)]
    pub tag: Option<String>,

    /// What to do with a record whose kubernetes field is not a map
    #[arg(long, value_enum)]
    pub malformed_records: Option<MalformedPolicy>,

    /// Metadata server host
    #[arg(long)]
    pub metadata_host: Option<String>,

    /// Timeout for metadata and logging requests, in seconds
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Print entries to stdout instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
