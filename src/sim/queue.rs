//! Clock and event queue
//!
//! Holds pending events and the current simulated time. Popping an event is
//! the only way the clock moves forward.

use super::error::InvalidSchedule;
use super::event::Event;
use super::scheduled_event::ScheduledEvent;
use super::time::SimTime;
use std::collections::BinaryHeap;
use tracing::trace;

#[derive(Default)]
pub struct EventQueue {
    now: SimTime,
    next_seq: u64,
    q: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last popped event (or the last explicit advance).
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Inserts an event and returns its sequence number.
    pub fn schedule(&mut self, at: SimTime, ev: Box<dyn Event>) -> Result<u64, InvalidSchedule> {
        if at < self.now {
            return Err(InvalidSchedule { at, now: self.now });
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!(now = ?self.now, ?at, seq, kind = ev.kind(), "event queued");
        self.q.push(ScheduledEvent { at, seq, ev });
        Ok(seq)
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.q.peek().map(|top| top.at)
    }

    /// Removes the earliest event and advances the clock to its time.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent> {
        let item = self.q.pop()?;
        debug_assert!(item.at >= self.now, "event queue went back in time");
        self.now = item.at;
        Some(item)
    }

    /// Moves the clock forward without popping (used when a run stops at its
    /// horizon). Never moves it backwards.
    pub(crate) fn advance_to(&mut self, t: SimTime) {
        self.now = self.now.max(t);
    }
}
