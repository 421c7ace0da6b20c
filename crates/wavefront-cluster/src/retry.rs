//! Reliable point-to-point delivery.
//!
//! The [`ReliableSender`] owns the acknowledgment state of every control
//! message that must reach a neighboring cluster: distribution maps and
//! inter-cluster propagation offers. Each pending message is keyed by
//! `(peer, kind)` and retransmitted on a fixed period until one of:
//!
//! - an [`Ack`](crate::Message::Ack) is routed back through
//!   [`acknowledge`](ReliableSender::acknowledge);
//! - the entry is superseded by a newer [`arm`](ReliableSender::arm);
//! - the owner gives up with [`cancel_kind`](ReliableSender::cancel_kind) or
//!   [`satisfy_all`](ReliableSender::satisfy_all).
//!
//! There is no backoff: the period is a fixed multiple of the TDMA slot.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::trace;

use crate::env::{Clock, Timer, TimerHandle, Transport};
use crate::message::{Message, MessageKind, Packet};
use crate::record::NodeId;

/// A message awaiting acknowledgment.
#[derive(Debug, Clone)]
struct Pending {
    message: Message,
    attempts: u32,
    timer: TimerHandle,
}

/// Retransmits unacknowledged messages.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    retry_interval: Duration,
    pending: BTreeMap<(NodeId, MessageKind), Pending>,
}

impl ReliableSender {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval,
            pending: BTreeMap::new(),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Register `message` for `peer` and transmit it first after `first_delay`.
    ///
    /// Replaces any pending message of the same kind for the same peer.
    pub fn arm<C: Clock>(&mut self, env: &mut C, peer: NodeId, message: Message, first_delay: Duration) {
        let kind = message.kind();
        let timer = env.schedule(first_delay, Timer::Retransmit { peer, kind });
        let entry = Pending {
            message,
            attempts: 0,
            timer,
        };
        if let Some(previous) = self.pending.insert((peer, kind), entry) {
            env.cancel(previous.timer);
            trace!(%peer, %kind, "Superseded pending message");
        }
    }

    /// Handle a [`Timer::Retransmit`]. Sends the pending copy and re-arms.
    ///
    /// Returns the attempt number sent, or `None` if nothing is pending.
    pub fn on_timer<E: Clock + Transport>(&mut self, env: &mut E, peer: NodeId, kind: MessageKind) -> Option<u32> {
        let retry_interval = self.retry_interval;
        let entry = self.pending.get_mut(&(peer, kind))?;

        entry.attempts += 1;
        env.send_to(peer, Packet::single(entry.message.clone()));
        entry.timer = env.schedule(retry_interval, Timer::Retransmit { peer, kind });

        trace!(%peer, %kind, attempt = entry.attempts, "Transmitted reliable message");
        Some(entry.attempts)
    }

    /// Route an acknowledgment. Returns whether it matched a pending message.
    pub fn acknowledge<C: Clock>(&mut self, env: &mut C, peer: NodeId, kind: MessageKind) -> bool {
        match self.pending.remove(&(peer, kind)) {
            Some(entry) => {
                env.cancel(entry.timer);
                trace!(%peer, %kind, attempts = entry.attempts, "Acknowledged");
                true
            }
            None => {
                trace!(%peer, %kind, "Ignoring ack for nothing pending");
                false
            }
        }
    }

    /// Stop retrying every message of `kind`. Returns how many were dropped.
    pub fn cancel_kind<C: Clock>(&mut self, env: &mut C, kind: MessageKind) -> usize {
        let keys: Vec<_> = self.pending.keys().filter(|(_, k)| *k == kind).copied().collect();
        for key in &keys {
            if let Some(entry) = self.pending.remove(key) {
                env.cancel(entry.timer);
            }
        }
        keys.len()
    }

    /// Treat every pending message as acknowledged.
    pub fn satisfy_all<C: Clock>(&mut self, env: &mut C) -> usize {
        let count = self.pending.len();
        for (_, entry) in std::mem::take(&mut self.pending) {
            env.cancel(entry.timer);
        }
        count
    }

    pub fn is_pending(&self, peer: NodeId, kind: MessageKind) -> bool {
        self.pending.contains_key(&(peer, kind))
    }

    /// Transmissions so far of the pending message for `(peer, kind)`.
    pub fn attempts(&self, peer: NodeId, kind: MessageKind) -> Option<u32> {
        self.pending.get(&(peer, kind)).map(|p| p.attempts)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    #[derive(Default)]
    struct Recorder {
        next: u64,
        scheduled: Vec<(TimerHandle, Duration, Timer)>,
        cancelled: Vec<TimerHandle>,
        sent: Vec<(NodeId, Packet)>,
    }

    impl Clock for Recorder {
        fn now(&self) -> Timestamp {
            Timestamp::ZERO
        }

        fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
            self.next += 1;
            let handle = TimerHandle(self.next);
            self.scheduled.push((handle, delay, timer));
            handle
        }

        fn cancel(&mut self, handle: TimerHandle) {
            self.cancelled.push(handle);
        }
    }

    impl Transport for Recorder {
        fn broadcast(&mut self, _packet: Packet) {}

        fn send_to(&mut self, peer: NodeId, packet: Packet) {
            self.sent.push((peer, packet));
        }
    }

    fn ack(seq: u64) -> Message {
        Message::Ack {
            seq,
            cluster_id: NodeId(1),
            kind: MessageKind::ClusterInfo,
        }
    }

    const RETRY: Duration = Duration::from_millis(250);

    #[test]
    fn retransmits_same_copy_until_acked() {
        let mut env = Recorder::default();
        let mut sender = ReliableSender::new(RETRY);
        let peer = NodeId(30);

        sender.arm(&mut env, peer, ack(7), Duration::from_millis(50));
        assert_eq!(env.scheduled[0].1, Duration::from_millis(50));
        assert!(env.sent.is_empty());

        assert_eq!(sender.on_timer(&mut env, peer, MessageKind::Ack), Some(1));
        assert_eq!(sender.on_timer(&mut env, peer, MessageKind::Ack), Some(2));
        assert_eq!(env.sent.len(), 2);
        assert_eq!(env.sent[0], env.sent[1]);
        assert_eq!(env.scheduled.last().unwrap().1, RETRY);

        assert!(sender.acknowledge(&mut env, peer, MessageKind::Ack));
        assert_eq!(env.cancelled, vec![env.scheduled.last().unwrap().0]);
        assert_eq!(sender.on_timer(&mut env, peer, MessageKind::Ack), None);
        assert_eq!(env.sent.len(), 2);
    }

    #[test]
    fn unknown_ack_is_ignored() {
        let mut env = Recorder::default();
        let mut sender = ReliableSender::new(RETRY);
        assert!(!sender.acknowledge(&mut env, NodeId(9), MessageKind::DistroMap));
        assert!(env.cancelled.is_empty());
    }

    #[test]
    fn rearming_replaces_previous() {
        let mut env = Recorder::default();
        let mut sender = ReliableSender::new(RETRY);
        let peer = NodeId(2);

        sender.arm(&mut env, peer, ack(1), Duration::ZERO);
        sender.arm(&mut env, peer, ack(2), Duration::ZERO);
        assert_eq!(sender.pending_count(), 1);
        assert_eq!(env.cancelled, vec![TimerHandle(1)]);

        sender.on_timer(&mut env, peer, MessageKind::Ack);
        assert_eq!(env.sent[0].1, Packet::single(ack(2)));
    }

    #[test]
    fn cancel_kind_leaves_other_kinds() {
        let mut env = Recorder::default();
        let mut sender = ReliableSender::new(RETRY);
        sender.arm(&mut env, NodeId(1), ack(1), Duration::ZERO);
        sender.arm(&mut env, NodeId(2), ack(2), Duration::ZERO);
        sender.arm(
            &mut env,
            NodeId(1),
            Message::Ack {
                seq: 3,
                cluster_id: NodeId(1),
                kind: MessageKind::DistroMap,
            },
            Duration::ZERO,
        );
        // Keyed by the kind of the pending message, not the kind it acknowledges.
        assert_eq!(sender.pending_count(), 2);

        assert_eq!(sender.cancel_kind(&mut env, MessageKind::DistroMap), 0);
        assert_eq!(sender.cancel_kind(&mut env, MessageKind::Ack), 2);
        assert_eq!(sender.pending_count(), 0);
    }

    #[test]
    fn satisfy_all_cancels_everything() {
        let mut env = Recorder::default();
        let mut sender = ReliableSender::new(RETRY);
        sender.arm(&mut env, NodeId(1), ack(1), Duration::ZERO);
        sender.arm(&mut env, NodeId(2), ack(2), Duration::ZERO);

        assert_eq!(sender.satisfy_all(&mut env), 2);
        assert_eq!(env.cancelled.len(), 2);
        assert!(!sender.is_pending(NodeId(1), MessageKind::Ack));
    }
}
