//! Capacity-bounded resource with a FIFO wait queue.
//!
//! Mutated only from inside event processing, which is strictly sequential,
//! so there is no locking here. The resource only does the bookkeeping; the
//! environment turns a grant from `release` into a resume event.

use super::activity::ActivityId;
use super::error::{ResourceMisuse, SimError};
use super::time::SimTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, trace};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ResourceId(pub usize);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Outcome of [`Resource::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Pending,
}

/// A queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub activity: ActivityId,
    pub enqueued_at: SimTime,
}

/// Counters kept for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    /// All grants, immediate or from the queue.
    pub grants: u64,
    /// Grants that did not wait.
    pub immediate_grants: u64,
    pub releases: u64,
    pub withdrawals: u64,
    /// Sum of queueing delays over granted requests.
    pub total_wait: SimTime,
    pub max_queue_len: usize,
}

impl ResourceStats {
    /// Mean queueing delay per grant (immediate grants count as zero).
    pub fn mean_wait(&self) -> SimTime {
        if self.grants == 0 {
            return SimTime::ZERO;
        }
        SimTime(self.total_wait.0 / self.grants)
    }
}

#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    name: String,
    capacity: usize,
    in_use: usize,
    holders: BTreeMap<ActivityId, usize>,
    wait_queue: VecDeque<Request>,
    stats: ResourceStats,
}

impl Resource {
    pub(crate) fn new(
        id: ResourceId,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<Self, SimError> {
        let name = name.into();
        if capacity == 0 {
            return Err(SimError::InvalidCapacity { name });
        }
        Ok(Self {
            id,
            name,
            capacity,
            in_use: 0,
            holders: BTreeMap::new(),
            wait_queue: VecDeque::new(),
            stats: ResourceStats::default(),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn available(&self) -> usize {
        self.capacity - self.in_use
    }

    pub fn queue_len(&self) -> usize {
        self.wait_queue.len()
    }

    pub fn stats(&self) -> &ResourceStats {
        &self.stats
    }

    /// Units currently held by `activity`.
    pub fn held_by(&self, activity: ActivityId) -> usize {
        self.holders.get(&activity).copied().unwrap_or(0)
    }

    /// Holders and their unit counts, in activity-id order.
    pub fn holders(&self) -> impl Iterator<Item = (ActivityId, usize)> + '_ {
        self.holders.iter().map(|(a, n)| (*a, *n))
    }

    /// Pending requests, head first.
    pub fn waiters(&self) -> impl Iterator<Item = &Request> + '_ {
        self.wait_queue.iter()
    }

    pub fn is_waiting(&self, activity: ActivityId) -> bool {
        self.wait_queue.iter().any(|r| r.activity == activity)
    }

    /// Takes a unit if one is free, otherwise queues the request at the tail.
    pub fn acquire(&mut self, activity: ActivityId, now: SimTime) -> Acquire {
        if self.in_use < self.capacity {
            self.grant(activity);
            self.stats.immediate_grants += 1;
            trace!(resource = %self.name, %activity, in_use = self.in_use, "granted immediately");
            return Acquire::Granted;
        }
        self.wait_queue.push_back(Request {
            activity,
            enqueued_at: now,
        });
        self.stats.max_queue_len = self.stats.max_queue_len.max(self.wait_queue.len());
        debug!(
            resource = %self.name,
            %activity,
            queue_len = self.wait_queue.len(),
            "resource full, request queued"
        );
        Acquire::Pending
    }

    /// Returns one unit held by `activity`. If someone is waiting, the head of
    /// the queue gets the unit and is returned so the caller can wake it.
    pub fn release(
        &mut self,
        activity: ActivityId,
        now: SimTime,
    ) -> Result<Option<Request>, ResourceMisuse> {
        match self.holders.get_mut(&activity) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.holders.remove(&activity);
            }
            None => {
                return Err(ResourceMisuse {
                    resource: self.id,
                    name: self.name.clone(),
                    activity,
                });
            }
        }
        self.in_use -= 1;
        self.stats.releases += 1;

        let Some(next) = self.wait_queue.pop_front() else {
            return Ok(None);
        };
        self.grant(next.activity);
        self.stats.total_wait = self
            .stats
            .total_wait
            .saturating_add(now.saturating_sub(next.enqueued_at));
        debug!(
            resource = %self.name,
            from = %activity,
            to = %next.activity,
            waited = ?now.saturating_sub(next.enqueued_at),
            "unit handed to head of queue"
        );
        Ok(Some(next))
    }

    /// Removes the pending request of `activity`, if any.
    pub fn withdraw(&mut self, activity: ActivityId) -> Option<Request> {
        let pos = self.wait_queue.iter().position(|r| r.activity == activity)?;
        let req = self.wait_queue.remove(pos)?;
        self.stats.withdrawals += 1;
        debug!(resource = %self.name, %activity, "request withdrawn");
        Some(req)
    }

    fn grant(&mut self, activity: ActivityId) {
        debug_assert!(self.in_use < self.capacity);
        self.in_use += 1;
        *self.holders.entry(activity).or_insert(0) += 1;
        self.stats.grants += 1;
    }
}
