//! Deadline timers for the reactor.
//!
//! Min-heap by deadline with lazy cancellation: re-arming a connection's
//! timer bumps its generation instead of removing the stale heap entry, and
//! stale entries are skipped when they surface. Insert is O(log n), cancel
//! is O(1), and the next deadline is O(1), which is what the poll timeout
//! needs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// What the deadline means for the connection that armed it.
///
/// Each connection has one logical timer; its role is whichever deadline was
/// armed last. Expiry always shuts the connection down, so the role only
/// matters for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerRole {
    Connect,
    Idle,
    Send,
}

struct TimerEntry {
    deadline: Instant,
    token: usize,
    generation: u64,
    role: TimerRole,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.token == other.token
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline
        // on top. Tie-break by token for deterministic ordering.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Arms (or re-arms) the timer for `token`. The caller bumps the
    /// connection's generation first; entries armed under older generations
    /// become stale and are skipped on expiry.
    pub(crate) fn arm(&mut self, token: usize, generation: u64, after: Duration, role: TimerRole) {
        self.heap.push(TimerEntry {
            deadline: Instant::now() + after,
            token,
            generation,
            role,
        });
    }

    /// Time until the earliest deadline, `None` when no timers are armed.
    /// An already-expired deadline yields a zero timeout.
    pub(crate) fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(now))
    }

    /// Pops every entry whose deadline has passed. Stale generations are
    /// filtered by the caller, which knows each connection's live generation.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<(usize, u64, TimerRole)> {
        let mut fired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry present");
            fired.push((entry.token, entry.generation, entry.role));
        }
        fired
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
