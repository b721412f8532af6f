use crate::plugin::FlushStatus;

/// Failures while resolving the workload identity at init.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Not running on GCE: {0}")]
    Environment(String),

    #[error("{0}")]
    Configuration(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata {0} is not defined")]
    NotDefined(String),

    #[error("metadata {path} returned status {status}")]
    Status { path: String, status: u16 },
}

/// A `kubernetes` field whose value is not a nested mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("was not able to convert kubernetes entry to map (found {found})")]
pub struct MalformedRecord {
    pub found: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to logging endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("logging endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sink used before it was opened")]
    NotOpen,

    #[error("failed to write entries: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Batch-level failure reported back to the collection agent.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error(transparent)]
    Malformed(#[from] MalformedRecord),

    #[error("error during log sending: {0}")]
    Transport(#[from] TransportError),
}

impl FlushError {
    /// Both failure kinds are reported as unrecoverable; the agent must not
    /// replay the same batch.
    pub fn status(&self) -> FlushStatus {
        match self {
            Self::Malformed(_) | Self::Transport(_) => FlushStatus::Error,
        }
    }
}
