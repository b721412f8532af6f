use crate::error::MetadataError;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const METADATA_IP: &str = "169.254.169.254";
const METADATA_FLAVOR: &str = "Metadata-Flavor";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Flat string lookups against the instance metadata service.
pub trait MetadataService {
    async fn on_gce(&self) -> bool;
    async fn project_id(&self) -> Result<String, MetadataError>;
    async fn instance_name(&self) -> Result<String, MetadataError>;
    async fn zone(&self) -> Result<String, MetadataError>;
    async fn instance_attribute(&self, name: &str) -> Result<String, MetadataError>;
}

pub struct GceMetadataClient {
    client: Client,
    base_url: String,
    host_configured: bool,
}

impl GceMetadataClient {
    /// `host` wins over `GCE_METADATA_HOST`; without either the link-local
    /// address is used and `on_gce` has to probe it.
    pub fn new(host: Option<&str>, timeout: Duration) -> Result<Self, MetadataError> {
        let env_host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.trim().is_empty());
        let configured = host.map(str::to_string).or(env_host);
        let host_configured = configured.is_some();
        let host = configured.unwrap_or_else(|| METADATA_IP.to_string());

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url_for(&host),
            host_configured,
        })
    }

    async fn get(&self, path: &str) -> Result<String, MetadataError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Querying metadata {}", url);
        let resp = self
            .client
            .get(&url)
            .header(METADATA_FLAVOR, "Google")
            .send()
            .await?;
        match resp.status() {
            status if status.is_success() => Ok(resp.text().await?),
            StatusCode::NOT_FOUND => Err(MetadataError::NotDefined(path.to_string())),
            status => Err(MetadataError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn get_trimmed(&self, path: &str) -> Result<String, MetadataError> {
        self.get(path).await.map(|v| v.trim().to_string())
    }
}

impl MetadataService for GceMetadataClient {
    async fn on_gce(&self) -> bool {
        if self.host_configured {
            return true;
        }
        let probe = self
            .client
            .get(format!("{}/", self.base_url))
            .header(METADATA_FLAVOR, "Google")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(resp) => resp
                .headers()
                .get(METADATA_FLAVOR)
                .is_some_and(|v| v.as_bytes() == b"Google"),
            Err(e) => {
                debug!("Metadata server probe failed: {}", e);
                false
            }
        }
    }

    async fn project_id(&self) -> Result<String, MetadataError> {
        self.get_trimmed("project/project-id").await
    }

    async fn instance_name(&self) -> Result<String, MetadataError> {
        self.get_trimmed("instance/name").await
    }

    async fn zone(&self) -> Result<String, MetadataError> {
        let zone = self.get_trimmed("instance/zone").await?;
        Ok(last_segment(&zone).to_string())
    }

    async fn instance_attribute(&self, name: &str) -> Result<String, MetadataError> {
        self.get(&format!("instance/attributes/{}", name)).await
    }
}

fn base_url_for(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/computeMetadata/v1", host)
    } else {
        format!("http://{}/computeMetadata/v1", host)
    }
}

/// `projects/123/zones/us-central1-a` -> `us-central1-a`
fn last_segment(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}
