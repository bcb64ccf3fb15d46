//! Scheduled event
//!
//! Heap entry ordered by `(at, seq)`.

use super::event::Event;
use super::time::SimTime;
use std::cmp::Ordering;

/// An event together with its firing time and insertion sequence number.
pub struct ScheduledEvent {
    pub(crate) at: SimTime,
    pub(crate) seq: u64,
    pub(crate) ev: Box<dyn Event>,
}

impl ScheduledEvent {
    pub fn at(&self) -> SimTime {
        self.at
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn kind(&self) -> &'static str {
        self.ev.kind()
    }

    fn key(&self) -> (SimTime, u64) {
        (self.at, self.seq)
    }
}

// max-heap: the smallest key must compare greatest
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledEvent {}
