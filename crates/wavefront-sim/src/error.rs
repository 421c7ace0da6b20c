//! Error types for wavefront-sim.

use thiserror::Error;
use wavefront_cluster::NodeId;

/// Result type for simulator operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised while building or loading a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A node could not be created.
    #[error("cluster error: {0}")]
    Cluster(#[from] wavefront_cluster::Error),

    /// A scenario or timeline file is malformed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Two nodes share an id.
    #[error("duplicate node {0}")]
    DuplicateNode(NodeId),

    /// Channel parameters are out of range.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
}
