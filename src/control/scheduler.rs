//! Pending channel-change applications ordered by fire time.
//!
//! Delayed applications are events in one queue drained by the simulation
//! task, not background timers. Two commands for the same node are never
//! coalesced: each keeps its own entry and fires independently, so the node
//! ends on whichever fires last.

use embassy_time::{Duration, Instant};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::command::CommandKind;

/// An accepted command waiting for its fire time.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Unique per (node, acceptance time, sequence).
    pub timer_key: String,
    pub node_index: usize,
    pub node_id: String,
    pub kind: CommandKind,
    pub channel: u32,
    pub fire_at: Instant,
    sequence: u64,
}

impl PartialEq for PendingCommand {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingCommand {}

impl PartialOrd for PendingCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at.cmp(&other.fire_at).then(self.sequence.cmp(&other.sequence))
    }
}

/// Min-queue of pending commands; ties on fire time resolve in acceptance order.
#[derive(Debug, Default)]
pub struct CommandQueue {
    heap: BinaryHeap<Reverse<PendingCommand>>,
    next_sequence: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry firing `delay` after `accepted_at`. Returns its timer key.
    pub fn schedule(
        &mut self,
        node_index: usize,
        node_id: &str,
        kind: CommandKind,
        channel: u32,
        accepted_at: Instant,
        delay: Duration,
    ) -> String {
        let pending = self.accept(node_index, node_id, kind, channel, accepted_at, delay);
        let timer_key = pending.timer_key.clone();
        self.heap.push(Reverse(pending));
        timer_key
    }

    /// Build an entry without queueing it (immediate application).
    pub fn accept(
        &mut self,
        node_index: usize,
        node_id: &str,
        kind: CommandKind,
        channel: u32,
        accepted_at: Instant,
        delay: Duration,
    ) -> PendingCommand {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        PendingCommand {
            timer_key: format!("{}:{}#{}", node_id, accepted_at.as_micros(), sequence),
            node_index,
            node_id: node_id.to_string(),
            kind,
            channel,
            fire_at: accepted_at + delay,
            sequence,
        }
    }

    /// Earliest fire time, if anything is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(pending)| pending.fire_at)
    }

    /// Remove and return every entry due at or before `now`, in firing order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<PendingCommand> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(pending)| pending.fire_at <= now) {
            if let Some(Reverse(pending)) = self.heap.pop() {
                due.push(pending);
            }
        }
        due
    }

    /// Drop every pending entry. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.heap.len();
        self.heap.clear();
        cancelled
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fire_order_then_acceptance_order() {
        let mut queue = CommandQueue::new();
        let t0 = Instant::from_secs(10);
        queue.schedule(0, "node-001", CommandKind::SetChannel, 6, t0, Duration::from_secs(5));
        queue.schedule(1, "node-002", CommandKind::SetChannel, 11, t0, Duration::from_secs(2));
        queue.schedule(2, "node-003", CommandKind::SetChannel, 1, t0, Duration::from_secs(2));

        assert_eq!(queue.next_deadline(), Some(t0 + Duration::from_secs(2)));
        assert!(queue.pop_due(t0 + Duration::from_secs(1)).is_empty());

        let due = queue.pop_due(t0 + Duration::from_secs(2));
        let ids: Vec<_> = due.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(ids, vec!["node-002", "node-003"]);
        assert_eq!(queue.len(), 1);

        let due = queue.pop_due(t0 + Duration::from_secs(60));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].channel, 6);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn same_node_same_instant_gets_distinct_keys() {
        let mut queue = CommandQueue::new();
        let t0 = Instant::from_millis(1234);
        let a = queue.schedule(0, "node-001", CommandKind::SetChannel, 6, t0, Duration::from_secs(1));
        let b = queue.schedule(0, "node-001", CommandKind::SetChannel, 11, t0, Duration::from_secs(1));
        assert_ne!(a, b);
        assert!(a.starts_with("node-001:1234000#"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn cancel_all_empties_queue() {
        let mut queue = CommandQueue::new();
        let t0 = Instant::from_secs(1);
        queue.schedule(0, "node-001", CommandKind::SetChannel, 6, t0, Duration::from_secs(1));
        queue.schedule(1, "node-002", CommandKind::SetChannel, 6, t0, Duration::from_secs(3));
        assert_eq!(queue.cancel_all(), 2);
        assert!(queue.pop_due(Instant::from_secs(100)).is_empty());
    }
}
