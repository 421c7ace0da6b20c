//! Protocol status of a node.

use serde::{Deserialize, Serialize};

/// Where a node is in the clustering and propagation lifecycle.
///
/// ```text
/// INIT → HEAD_ELECTION → {FORMATION | UPDATE} → UPDATE ⇄ (loop)
///      → EXCHANGE_DISTRO_MAP → DECIDE_PROPAGATION_PARAM
///      → PROPAGATION_READY → PROPAGATION_RUNNING → PROPAGATION_COMPLETE
/// ```
///
/// In reverse propagation mode a node cycles `ACTIVE ⇄ PROPAGATION_COMPLETE`
/// after its first activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    Init,
    HeadElection,
    Formation,
    Update,
    ExchangeDistroMap,
    DecidePropagationParam,
    PropagationReady,
    PropagationRunning,
    PropagationComplete,
    Active,
}

impl NodeStatus {
    /// Still forming clusters.
    pub fn is_clustering(self) -> bool {
        matches!(self, Self::Init | Self::HeadElection | Self::Formation | Self::Update)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::HeadElection => "HEAD_ELECTION",
            Self::Formation => "FORMATION",
            Self::Update => "UPDATE",
            Self::ExchangeDistroMap => "EXCHANGE_DISTRO_MAP",
            Self::DecidePropagationParam => "DECIDE_PROPAGATION_PARAM",
            Self::PropagationReady => "PROPAGATION_READY",
            Self::PropagationRunning => "PROPAGATION_RUNNING",
            Self::PropagationComplete => "PROPAGATION_COMPLETE",
            Self::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}
