use crate::error::{IdentityError, MetadataError};
use crate::metadata::MetadataService;
use crate::types::{IdentitySnapshot, ResourceType};
use tracing::{info, warn};

/// Identity values supplied by configuration. Empty means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityRequest {
    pub project: String,
    pub cluster: String,
    pub cluster_location: String,
    pub zone: String,
    pub node: String,
    pub resource_type: String,
}

/// Resolve the workload identity, trusting explicit configuration when a
/// project is given and falling back to the metadata service otherwise.
pub async fn resolve_identity<M: MetadataService>(
    request: &IdentityRequest,
    metadata: &M,
) -> Result<IdentitySnapshot, IdentityError> {
    let resource_type = ResourceType::parse(&request.resource_type);

    if !request.project.is_empty() {
        return Ok(from_explicit(request, resource_type));
    }

    if !metadata.on_gce().await {
        return Err(IdentityError::Environment(
            "metadata service is not reachable".to_string(),
        ));
    }

    let project = metadata
        .project_id()
        .await
        .map_err(|e| lookup_failed("project id", e))?;

    let cluster = if request.cluster.is_empty() {
        let cluster = metadata
            .instance_attribute("cluster-name")
            .await
            .map_err(|e| lookup_failed("cluster name", e))?;
        let cluster = cluster.trim().to_string();
        if cluster.is_empty() {
            return Err(IdentityError::Configuration(
                "cluster-name metadata was empty".to_string(),
            ));
        }
        cluster
    } else {
        request.cluster.clone()
    };

    let instance = if request.node.is_empty() {
        metadata
            .instance_name()
            .await
            .map_err(|e| lookup_failed("instance (node) name", e))?
    } else {
        request.node.clone()
    };

    let mut cluster_location = request.cluster_location.clone();
    let mut zone = request.zone.clone();
    match &resource_type {
        ResourceType::K8s => {
            if cluster_location.is_empty() {
                let location = metadata
                    .instance_attribute("cluster-location")
                    .await
                    .map_err(|e| lookup_failed("cluster location", e))?;
                cluster_location = location.trim().to_string();
                if cluster_location.is_empty() {
                    return Err(IdentityError::Configuration(
                        "cluster-location metadata was empty".to_string(),
                    ));
                }
            }
        }
        ResourceType::GkeContainer => {
            if zone.is_empty() {
                zone = metadata
                    .zone()
                    .await
                    .map_err(|e| lookup_failed("zone", e))?;
            }
        }
        ResourceType::Other(other) => {
            return Err(IdentityError::Configuration(format!(
                "Unsupported resource type used: '{}'",
                other
            )));
        }
    }

    Ok(IdentitySnapshot {
        project,
        cluster,
        cluster_location,
        zone,
        instance,
        resource_type,
    })
}

fn from_explicit(request: &IdentityRequest, resource_type: ResourceType) -> IdentitySnapshot {
    info!("Using identity metadata from configuration");
    if request.cluster.is_empty() {
        warn!("Cluster name was not set. This can be set with --cluster-name");
    }
    if request.cluster_location.is_empty() {
        warn!("Cluster location was not set. This can be set with --cluster-location");
    }
    if request.zone.is_empty() {
        warn!("Zone was not set. This can be set with --zone-override");
    }
    if request.node.is_empty() {
        warn!("Node was not set. This can be set with --node-name");
    }

    IdentitySnapshot {
        project: request.project.clone(),
        cluster: request.cluster.clone(),
        cluster_location: request.cluster_location.clone(),
        zone: request.zone.clone(),
        instance: request.node.clone(),
        resource_type,
    }
}

fn lookup_failed(what: &str, err: MetadataError) -> IdentityError {
    IdentityError::Configuration(format!("error while getting {}: {}", what, err))
}
