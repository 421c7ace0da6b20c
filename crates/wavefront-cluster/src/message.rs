//! Wire messages.
//!
//! Every message a node sends is a variant of [`Message`]. Messages travel in
//! a [`Packet`], the unit the transport moves, encoded with bincode.

use serde::{Deserialize, Serialize};
use wavefront_density::DistributionMap;
use wavefront_geometry::Vec2;

use crate::error::Result;
use crate::record::{NodeId, NodeRecord};
use crate::time::Timestamp;

/// Severity of an out-of-band incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentType {
    Emergency,
    Notification,
}

/// Protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Periodic identity and position broadcast.
    ClusterInfo { seq: u64, record: NodeRecord },

    /// A new cluster head announces its candidacy.
    InitiateCluster {
        seq: u64,
        cluster_id: NodeId,
        record: NodeRecord,
    },

    /// A cluster head confirms formation.
    FormCluster { seq: u64, record: NodeRecord },

    /// Head-to-head topology gossip: `record` represents cluster `cluster_id`.
    NeighborClusterInfo {
        seq: u64,
        cluster_id: NodeId,
        record: NodeRecord,
    },

    /// Member density of the sender's cluster.
    DistroMap {
        seq: u64,
        cluster_id: NodeId,
        record: NodeRecord,
        map: DistributionMap,
    },

    /// Forwarding offer from one cluster to another.
    InterClusterPropagation {
        seq: u64,
        cluster_id: NodeId,
        source: Vec2,
        destination: Vec2,
        direction: Vec2,
        start_time: Timestamp,
    },

    /// Head-to-member wavefront schedule.
    IntraClusterPropagation {
        seq: u64,
        cluster_id: NodeId,
        starting_node: NodeId,
        start_time: Timestamp,
        direction: Vec2,
    },

    /// Node-to-node wavefront relaxation, sent when a node activates.
    InterNodePropagation {
        seq: u64,
        cluster_id: Option<NodeId>,
        position: Vec2,
        direction: Vec2,
        start_time: Timestamp,
    },

    /// Application-level acknowledgment of a reliably sent message.
    Ack {
        seq: u64,
        cluster_id: NodeId,
        kind: MessageKind,
    },

    /// Out-of-band event, relayed by the cluster head to its members.
    IncidentEvent {
        origin: NodeId,
        timestamp: Timestamp,
        cluster_id: Option<NodeId>,
        incident: IncidentType,
    },
}

/// Tag of a [`Message`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ClusterInfo,
    InitiateCluster,
    FormCluster,
    NeighborClusterInfo,
    DistroMap,
    InterClusterPropagation,
    IntraClusterPropagation,
    InterNodePropagation,
    Ack,
    IncidentEvent,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ClusterInfo { .. } => MessageKind::ClusterInfo,
            Self::InitiateCluster { .. } => MessageKind::InitiateCluster,
            Self::FormCluster { .. } => MessageKind::FormCluster,
            Self::NeighborClusterInfo { .. } => MessageKind::NeighborClusterInfo,
            Self::DistroMap { .. } => MessageKind::DistroMap,
            Self::InterClusterPropagation { .. } => MessageKind::InterClusterPropagation,
            Self::IntraClusterPropagation { .. } => MessageKind::IntraClusterPropagation,
            Self::InterNodePropagation { .. } => MessageKind::InterNodePropagation,
            Self::Ack { .. } => MessageKind::Ack,
            Self::IncidentEvent { .. } => MessageKind::IncidentEvent,
        }
    }

    /// Serialized size in bytes.
    pub fn encoded_len(&self) -> Result<u64> {
        Ok(bincode::serialized_size(self)?)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Messages transmitted together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub messages: Vec<Message>,
}

impl Packet {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn single(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Split `messages` into packets whose encoding stays within `max_bytes`.
    ///
    /// A message that alone exceeds the cap travels in a packet of its own.
    pub fn batch(messages: Vec<Message>, max_bytes: usize) -> Result<Vec<Self>> {
        let envelope = bincode::serialized_size(&Self::default())?;
        let cap = max_bytes as u64;

        let mut packets = Vec::new();
        let mut current = Vec::new();
        let mut size = envelope;

        for message in messages {
            let len = message.encoded_len()?;
            if !current.is_empty() && size + len > cap {
                packets.push(Self::new(std::mem::take(&mut current)));
                size = envelope;
            }
            size += len;
            current.push(message);
        }

        if !current.is_empty() {
            packets.push(Self::new(current));
        }
        Ok(packets)
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Self::single(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavefront_density::GridSpec;
    use wavefront_geometry::Vec3;

    fn info(id: u64) -> Message {
        Message::ClusterInfo {
            seq: id,
            record: NodeRecord::new(NodeId(id), Vec3::planar(1.0, 2.0), Timestamp::from_millis(5)),
        }
    }

    #[test]
    fn packet_survives_codec() {
        let packet = Packet::new(vec![
            info(1),
            Message::Ack {
                seq: 9,
                cluster_id: NodeId(4),
                kind: MessageKind::DistroMap,
            },
            Message::DistroMap {
                seq: 2,
                cluster_id: NodeId(4),
                record: NodeRecord::new(NodeId(4), Vec3::ZERO, Timestamp::ZERO).as_head(),
                map: DistributionMap::fallback(GridSpec::new(4, 1.0)),
            },
        ]);
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Packet::decode(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(info(1).kind(), MessageKind::ClusterInfo);
        let msg = Message::IncidentEvent {
            origin: NodeId(1),
            timestamp: Timestamp::ZERO,
            cluster_id: None,
            incident: IncidentType::Emergency,
        };
        assert_eq!(msg.kind(), MessageKind::IncidentEvent);
    }

    #[test]
    fn batch_respects_cap() {
        let messages: Vec<Message> = (0..50).map(info).collect();
        let one = info(0).encoded_len().unwrap() as usize;
        let cap = one * 10 + 16;

        let packets = Packet::batch(messages.clone(), cap).unwrap();
        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.encode().unwrap().len() <= cap);
        }
        let flattened: Vec<Message> = packets.into_iter().flat_map(|p| p.messages).collect();
        assert_eq!(flattened, messages);
    }

    #[test]
    fn small_batch_is_one_packet() {
        let packets = Packet::batch(vec![info(1), info(2)], 2296).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 2);
    }

    #[test]
    fn oversized_message_travels_alone() {
        let packets = Packet::batch(vec![info(1), info(2)], 1).unwrap();
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn empty_batch() {
        assert!(Packet::batch(Vec::new(), 2296).unwrap().is_empty());
    }
}
