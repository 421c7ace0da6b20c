//! Error types for wavefront-cluster.

use thiserror::Error;

use crate::record::NodeId;

/// Result type for wavefront-cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the clustering core.
///
/// Protocol handlers never return these: anomalies while running degrade to
/// a safe local state. Only construction and the wire codec can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is out of range. Fatal at startup.
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// Packet encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A point-to-point destination is not in the directory.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
