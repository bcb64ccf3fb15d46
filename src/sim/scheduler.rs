//! Activity scheduler
//!
//! Owns the activity table and drives a process from one suspension point to
//! the next. A process is taken out of its slot while it runs, so it can use
//! the environment mutably (spawn children, release units) without aliasing.

use super::activity::{ActivityFault, ActivityId, ActivityState, Process, Step, Wake};
use super::environment::{Context, Environment, FaultPolicy, FaultRecord};
use super::error::SimError;
use super::event::Event;
use super::resource::{Acquire, ResourceId};
use super::time::SimTime;
use crate::trace::TraceKind;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

pub(crate) struct Slot {
    name: String,
    state: ActivityState,
    process: Option<Box<dyn Process>>,
    /// Bumped on every suspension; resume events carrying an older epoch are stale.
    epoch: u64,
    held: BTreeMap<ResourceId, usize>,
    acquired: u64,
    released: u64,
}

/// Activity table.
#[derive(Default)]
pub struct Scheduler {
    slots: Vec<Slot>,
    finished: usize,
    failed: usize,
}

impl Scheduler {
    pub(crate) fn insert(&mut self, name: String, process: Box<dyn Process>) -> ActivityId {
        let id = ActivityId(self.slots.len());
        self.slots.push(Slot {
            name,
            state: ActivityState::Running,
            process: Some(process),
            epoch: 0,
            held: BTreeMap::new(),
            acquired: 0,
            released: 0,
        });
        id
    }

    pub(crate) fn slot_mut(&mut self, id: ActivityId) -> Option<&mut Slot> {
        self.slots.get_mut(id.0)
    }

    pub fn state(&self, id: ActivityId) -> Option<&ActivityState> {
        self.slots.get(id.0).map(|s| &s.state)
    }

    pub fn name(&self, id: ActivityId) -> Option<&str> {
        self.slots.get(id.0).map(|s| s.name.as_str())
    }

    /// Units of `resource` currently held by `id`.
    pub fn held(&self, id: ActivityId, resource: ResourceId) -> usize {
        self.slots
            .get(id.0)
            .and_then(|s| s.held.get(&resource).copied())
            .unwrap_or(0)
    }

    /// `(grants received, releases issued)` over the activity's lifetime.
    pub fn balance(&self, id: ActivityId) -> Option<(u64, u64)> {
        self.slots.get(id.0).map(|s| (s.acquired, s.released))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Activities that are neither finished nor failed.
    pub fn alive(&self) -> usize {
        self.slots.len() - self.finished - self.failed
    }

    pub fn ids(&self) -> impl Iterator<Item = ActivityId> + '_ {
        (0..self.slots.len()).map(ActivityId)
    }
}

/// Resumes an activity if its epoch still matches.
pub(crate) struct Resume {
    pub(crate) id: ActivityId,
    pub(crate) epoch: u64,
    pub(crate) wake: Wake,
}

impl Event for Resume {
    fn execute(self: Box<Self>, env: &mut Environment) {
        let Resume { id, epoch, wake } = *self;
        let current = env.scheduler.slot_mut(id).map(|s| s.epoch);
        if current != Some(epoch) {
            trace!(activity = %id, epoch, ?current, "stale wake-up dropped");
            return;
        }
        env.drive(id, wake);
    }

    fn kind(&self) -> &'static str {
        "resume"
    }
}

/// Fires when an `AcquireWithin` request runs out of patience.
pub(crate) struct Renege {
    pub(crate) id: ActivityId,
    pub(crate) epoch: u64,
    pub(crate) resource: ResourceId,
}

impl Event for Renege {
    fn execute(self: Box<Self>, env: &mut Environment) {
        let Renege {
            id,
            epoch,
            resource,
        } = *self;
        if env.scheduler.slot_mut(id).map(|s| s.epoch) != Some(epoch) {
            return;
        }
        let withdrawn = env
            .resources
            .get_mut(resource.0)
            .and_then(|r| r.withdraw(id))
            .is_some();
        if !withdrawn {
            return;
        }
        debug!(activity = %id, %resource, "patience exhausted, reneging");
        env.record(id, TraceKind::Reneged { resource });
        env.bump_epoch(id);
        env.drive(id, Wake::Reneged(resource));
    }

    fn kind(&self) -> &'static str {
        "renege"
    }
}

impl Environment {
    /// Runs `id` from its current suspension point to the next one.
    pub(crate) fn drive(&mut self, id: ActivityId, mut wake: Wake) {
        let Some(slot) = self.scheduler.slot_mut(id) else {
            return;
        };
        if slot.state.is_terminal() {
            return;
        }
        let Some(mut process) = slot.process.take() else {
            // already on the stack (re-entrant wake-up); the outer call owns it
            return;
        };
        slot.state = ActivityState::Running;
        self.record(id, TraceKind::Resumed);

        loop {
            let result = {
                let mut ctx = Context::new(self, id);
                process.resume(&mut ctx, wake)
            };
            let now = self.queue.now();
            let (resource, patience) = match result {
                Ok(Step::Delay(d)) => {
                    let until = now.saturating_add(d);
                    let epoch = self.bump_epoch(id);
                    self.set_state(id, ActivityState::WaitingForTime { until });
                    self.record(id, TraceKind::Delayed { until_ns: until.0 });
                    self.put_back(id, process);
                    self.schedule_resume(until, id, epoch, Wake::Timeout);
                    return;
                }
                Ok(Step::Acquire(resource)) => (resource, None),
                Ok(Step::AcquireWithin { resource, patience }) => (resource, Some(patience)),
                Ok(Step::Done) => {
                    self.finish(id);
                    return;
                }
                Err(fault) => {
                    self.fail(id, fault);
                    return;
                }
            };
            match self.request(id, resource, patience) {
                Ok(Acquire::Granted) => wake = Wake::Granted(resource),
                Ok(Acquire::Pending) => {
                    self.put_back(id, process);
                    return;
                }
                Err(err) => {
                    self.fail(id, err.into());
                    return;
                }
            }
        }
    }

    /// Issues an acquire on behalf of `id`. On `Pending` the activity is parked
    /// (and a renege event armed when it has a patience).
    fn request(
        &mut self,
        id: ActivityId,
        resource: ResourceId,
        patience: Option<SimTime>,
    ) -> Result<Acquire, SimError> {
        let now = self.queue.now();
        let res = self
            .resources
            .get_mut(resource.0)
            .ok_or(SimError::UnknownResource(resource))?;
        let outcome = res.acquire(id, now);
        self.record(id, TraceKind::Requested { resource });
        match outcome {
            Acquire::Granted => self.note_grant(id, resource),
            Acquire::Pending => {
                let epoch = self.bump_epoch(id);
                self.set_state(
                    id,
                    ActivityState::WaitingForResource {
                        resource,
                        since: now,
                    },
                );
                if let Some(patience) = patience {
                    let at = now.saturating_add(patience);
                    self.push_event(
                        at,
                        Box::new(Renege {
                            id,
                            epoch,
                            resource,
                        }),
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// Bookkeeping for a unit handed to `id`, immediately or from the queue.
    fn note_grant(&mut self, id: ActivityId, resource: ResourceId) {
        if let Some(slot) = self.scheduler.slot_mut(id) {
            *slot.held.entry(resource).or_insert(0) += 1;
            slot.acquired += 1;
        }
        self.record(id, TraceKind::Granted { resource });
    }

    /// Returns one unit of `resource` held by `holder` and wakes the next waiter.
    pub(crate) fn release_unit(
        &mut self,
        holder: ActivityId,
        resource: ResourceId,
    ) -> Result<(), SimError> {
        let now = self.queue.now();
        let res = self
            .resources
            .get_mut(resource.0)
            .ok_or(SimError::UnknownResource(resource))?;
        let next = res.release(holder, now)?;

        if let Some(slot) = self.scheduler.slot_mut(holder) {
            if let Some(n) = slot.held.get_mut(&resource) {
                *n -= 1;
                if *n == 0 {
                    slot.held.remove(&resource);
                }
            }
            slot.released += 1;
        }
        self.record(holder, TraceKind::Released { resource });

        if let Some(req) = next {
            self.note_grant(req.activity, resource);
            // holds the unit now; only the zero-delay resume is outstanding
            self.set_state(req.activity, ActivityState::Running);
            let epoch = self.bump_epoch(req.activity);
            self.schedule_resume(now, req.activity, epoch, Wake::Granted(resource));
        }
        Ok(())
    }

    /// Returns every unit `id` still holds, lowest resource id first.
    fn release_all(&mut self, id: ActivityId) -> usize {
        let held: Vec<(ResourceId, usize)> = match self.scheduler.slot_mut(id) {
            Some(slot) => slot.held.iter().map(|(r, n)| (*r, *n)).collect(),
            None => return 0,
        };
        let mut count = 0;
        for (resource, n) in held {
            for _ in 0..n {
                if let Err(err) = self.release_unit(id, resource) {
                    // held map and resource disagree; keep going with the rest
                    warn!(activity = %id, %err, "scoped release failed");
                    continue;
                }
                count += 1;
            }
        }
        count
    }

    /// Drops a pending request of `id`, if it is still queued anywhere.
    pub(crate) fn withdraw_pending(&mut self, id: ActivityId) -> Option<ResourceId> {
        let resource = match self.scheduler.state(id) {
            Some(ActivityState::WaitingForResource { resource, .. }) => *resource,
            _ => return None,
        };
        self.resources.get_mut(resource.0)?.withdraw(id)?;
        self.record(id, TraceKind::Withdrawn { resource });
        Some(resource)
    }

    fn finish(&mut self, id: ActivityId) {
        let leaked = self.release_all(id);
        if leaked > 0 {
            let name = self.scheduler.name(id).unwrap_or_default().to_string();
            warn!(
                activity = %id,
                name = %name,
                units = leaked,
                "activity finished holding units; released"
            );
        }
        self.set_state(id, ActivityState::Finished);
        self.scheduler.finished += 1;
        self.record(id, TraceKind::Finished);
        debug!(activity = %id, now = ?self.queue.now(), "activity finished");
    }

    /// Marks `id` failed, returns its units and reports the fault.
    pub(crate) fn fail(&mut self, id: ActivityId, fault: ActivityFault) {
        let released = self.terminate(id, &fault.reason);
        let name = self.scheduler.name(id).unwrap_or_default().to_string();
        warn!(activity = %id, name = %name, reason = %fault, released, "activity failed");

        let record = FaultRecord {
            at: self.queue.now(),
            activity: id,
            name,
            reason: fault.reason,
        };
        if self.config.fault_policy == FaultPolicy::Abort && self.aborted.is_none() {
            self.aborted = Some(record.clone());
        }
        self.faults.push(record);
    }

    /// Moves `id` to `Failed` without reporting a fault (used by `cancel`).
    /// Returns the number of units handed back.
    pub(crate) fn terminate(&mut self, id: ActivityId, reason: &str) -> usize {
        self.withdraw_pending(id);
        let released = self.release_all(id);
        self.bump_epoch(id);
        if let Some(slot) = self.scheduler.slot_mut(id) {
            slot.process = None;
        }
        self.set_state(
            id,
            ActivityState::Failed {
                reason: reason.to_string(),
            },
        );
        self.scheduler.failed += 1;
        self.record(
            id,
            TraceKind::Failed {
                reason: reason.to_string(),
            },
        );
        released
    }

    pub(crate) fn bump_epoch(&mut self, id: ActivityId) -> u64 {
        match self.scheduler.slot_mut(id) {
            Some(slot) => {
                slot.epoch += 1;
                slot.epoch
            }
            None => 0,
        }
    }

    fn set_state(&mut self, id: ActivityId, state: ActivityState) {
        if let Some(slot) = self.scheduler.slot_mut(id) {
            slot.state = state;
        }
    }

    fn put_back(&mut self, id: ActivityId, process: Box<dyn Process>) {
        if let Some(slot) = self.scheduler.slot_mut(id) {
            slot.process = Some(process);
        }
    }

    pub(crate) fn schedule_resume(&mut self, at: SimTime, id: ActivityId, epoch: u64, wake: Wake) {
        self.push_event(at, Box::new(Resume { id, epoch, wake }));
    }
}
