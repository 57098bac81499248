//! Virtual clock and ordered event queue.

use crate::utils::slab::Key;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Something the simulation does at a point in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// Fire timer `key`, if it is still armed with `generation`.
    Timer { key: Key, generation: u64 },
    /// Hand message `queue_index` of channel `channel` to its watchers.
    Deliver { channel: usize, queue_index: u64 },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    time: i64,
    sequence: u64,
    event: Event,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.sequence).cmp(&(other.time, other.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Events ordered by time, then by the order they were scheduled in.
#[derive(Debug, Default)]
pub(crate) struct EventScheduler {
    now: i64,
    sequence: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
}

impl EventScheduler {
    pub(crate) fn now(&self) -> i64 {
        self.now
    }

    /// Queues `event` at `time`. Times in the past are clamped to now.
    pub(crate) fn schedule(&mut self, time: i64, event: Event) {
        self.sequence += 1;
        self.queue.push(Reverse(Scheduled {
            time: time.max(self.now),
            sequence: self.sequence,
            event,
        }));
    }

    /// Removes the next event due at or before `end` and advances the clock to it.
    pub(crate) fn pop_until(&mut self, end: i64) -> Option<(i64, Event)> {
        if self.queue.peek()?.0.time > end {
            return None;
        }

        let Reverse(scheduled) = self.queue.pop()?;
        self.now = scheduled.time;
        Some((scheduled.time, scheduled.event))
    }

    /// Moves the clock forward to `time`.
    pub(crate) fn advance_to(&mut self, time: i64) {
        self.now = self.now.max(time);
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}
