//! Event types and priority queue for the discrete-event simulator.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use wavefront_cluster::{NodeId, Timer, TimerHandle, Timestamp};

/// Unique sequence number for deterministic ordering of same-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Events in the simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Fire a node timer.
    TimerFire {
        node: NodeId,
        handle: TimerHandle,
        timer: Timer,
    },
    /// Hand an encoded packet to a node.
    Delivery { to: NodeId, from: NodeId, data: Vec<u8> },
    /// A node leaves the network for good.
    Departure { node: NodeId },
}

/// An event with its due time and sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Min-heap ordering: BinaryHeap is a max-heap, so compare in reverse.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Pending events plus the bookkeeping for timer handles.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    cancelled: HashSet<TimerHandle>,
    next_seq: u64,
    next_handle: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` at `time`.
    pub fn push(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.heap.push(ScheduledEvent::new(time, seq, event));
    }

    /// Queue a timer for `node`, `delay` after `now`.
    pub fn schedule_timer(&mut self, node: NodeId, now: Timestamp, delay: Duration, timer: Timer) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.push(now + delay, Event::TimerFire { node, handle, timer });
        handle
    }

    /// Mark a timer as cancelled. It is discarded when it comes due.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if handle.0 < self.next_handle {
            self.cancelled.insert(handle);
        }
    }

    /// Due time of the next event.
    pub fn peek_time(&self) -> Option<Timestamp> {
        self.heap.peek().map(|e| e.time)
    }

    /// Remove the next live event, skipping cancelled timers.
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.pop_due(Timestamp::MAX)
    }

    /// Like [`pop`](Self::pop), but only if the event is due by `until`.
    pub fn pop_due(&mut self, until: Timestamp) -> Option<ScheduledEvent> {
        loop {
            if self.heap.peek()?.time > until {
                return None;
            }
            let scheduled = self.heap.pop()?;
            if let Event::TimerFire { handle, .. } = scheduled.event {
                if self.cancelled.remove(&handle) {
                    continue;
                }
            }
            return Some(scheduled);
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure(id: u64) -> Event {
        Event::Departure { node: NodeId(id) }
    }

    #[test]
    fn earlier_events_pop_first() {
        let mut queue = EventQueue::new();
        queue.push(Timestamp::from_secs(10), departure(1));
        queue.push(Timestamp::from_secs(5), departure(2));

        let first = queue.pop().unwrap();
        assert_eq!(first.time, Timestamp::from_secs(5));
        assert!(matches!(first.event, Event::Departure { node: NodeId(2) }));
    }

    #[test]
    fn same_time_events_pop_in_insertion_order() {
        let mut queue = EventQueue::new();
        let t = Timestamp::from_secs(1);
        for id in 0..5 {
            queue.push(t, departure(id));
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|e| match e.event {
                Event::Departure { node } => node.0,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_timers_are_skipped() {
        let mut queue = EventQueue::new();
        let a = queue.schedule_timer(NodeId(1), Timestamp::ZERO, Duration::from_millis(10), Timer::Send);
        let b = queue.schedule_timer(NodeId(1), Timestamp::ZERO, Duration::from_millis(20), Timer::Maintenance);
        assert_ne!(a, b);

        queue.cancel(a);
        let next = queue.pop().unwrap();
        assert!(matches!(next.event, Event::TimerFire { handle, .. } if handle == b));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pop_due_respects_horizon() {
        let mut queue = EventQueue::new();
        let early = queue.schedule_timer(NodeId(1), Timestamp::ZERO, Duration::from_secs(1), Timer::Send);
        queue.schedule_timer(NodeId(1), Timestamp::ZERO, Duration::from_secs(3), Timer::Send);
        queue.cancel(early);

        assert!(queue.pop_due(Timestamp::from_secs(2)).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_due(Timestamp::from_secs(3)).unwrap().time, Timestamp::from_secs(3));
    }

    #[test]
    fn cancelling_unknown_handle_is_noop() {
        let mut queue = EventQueue::new();
        queue.cancel(TimerHandle(99));
        let h = queue.schedule_timer(NodeId(1), Timestamp::ZERO, Duration::ZERO, Timer::Start);
        assert_eq!(h, TimerHandle(0));
        assert!(queue.pop().is_some());
    }
}
