//! Error types for the job graph tracker

use thiserror::Error;

use crate::types::RemoteHandle;

/// Result type alias using TrackerError
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while tracking a remote job graph
#[derive(Debug, Error)]
pub enum TrackerError {
    /// An engine call returned a failure
    #[error("Engine call '{call}' failed: {detail}")]
    Remote { call: &'static str, detail: String },

    /// Topology discovery found no network with at least one node
    #[error("No graph network with nodes found under asset {0}")]
    TopologyNotFound(RemoteHandle),

    /// Asset link is not registered
    #[error("Asset link not found: {0}")]
    LinkNotFound(String),

    /// Network index or handle does not resolve
    #[error("Graph network not found: {0}")]
    NetworkNotFound(String),

    /// Node index, handle or path does not resolve
    #[error("Graph node not found: {0}")]
    NodeNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Create a remote call failure
    pub fn remote(call: &'static str, detail: impl Into<String>) -> Self {
        Self::Remote {
            call,
            detail: detail.into(),
        }
    }
}
