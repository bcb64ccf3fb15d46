//! Simulation environment
//!
//! One value per run: it owns the clock and event queue, the activity table
//! and every resource. Scenario code receives it explicitly; there is no
//! global simulation state.

use super::activity::{ActivityFault, ActivityHandle, ActivityId, ActivityState, Process, Wake};
use super::error::{InvalidSchedule, SimError};
use super::event::Event;
use super::queue::EventQueue;
use super::resource::{Resource, ResourceId};
use super::scheduler::Scheduler;
use super::time::SimTime;
use crate::trace::{TraceKind, TraceLog, TraceRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// What happens to the run when an activity fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Record the fault and keep going.
    #[default]
    Continue,
    /// Stop the run; `run` returns [`SimError::Aborted`].
    Abort,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub fault_policy: FaultPolicy,
    /// Record a [`TraceLog`] of scheduler transitions.
    pub trace: bool,
}

/// A fault caught at the scheduler boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    pub at: SimTime,
    pub activity: ActivityId,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No events left.
    Exhausted,
    /// The horizon passed with events still pending.
    HorizonReached,
}

/// Returned by [`Environment::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub final_time: SimTime,
    /// Events processed by this `run` call.
    pub events: u64,
    pub spawned: usize,
    pub finished: usize,
    pub failed: usize,
    /// Activities still suspended when the run stopped.
    pub suspended: usize,
    pub stop: StopReason,
    pub faults: Vec<FaultRecord>,
}

#[derive(Default)]
pub struct Environment {
    pub(crate) queue: EventQueue,
    pub(crate) scheduler: Scheduler,
    pub(crate) resources: Vec<Resource>,
    pub(crate) config: EnvConfig,
    pub(crate) faults: Vec<FaultRecord>,
    pub(crate) aborted: Option<FaultRecord>,
    trace: Option<TraceLog>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EnvConfig) -> Self {
        let trace = config.trace.then(TraceLog::default);
        Self {
            config,
            trace,
            ..Self::default()
        }
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Creates a resource with `capacity` units.
    pub fn add_resource(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<ResourceId, SimError> {
        let id = ResourceId(self.resources.len());
        let res = Resource::new(id, name, capacity)?;
        debug!(resource = %id, name = res.name(), capacity, "resource created");
        self.resources.push(res);
        Ok(id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.resources.iter()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn state(&self, id: ActivityId) -> Option<&ActivityState> {
        self.scheduler.state(id)
    }

    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    pub fn trace(&self) -> Option<&TraceLog> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<TraceLog> {
        self.trace.take()
    }

    /// Registers a new activity and runs it right away up to its first
    /// suspension point.
    pub fn spawn<P: Process>(&mut self, name: impl Into<String>, process: P) -> ActivityHandle {
        self.spawn_boxed(name.into(), Box::new(process))
    }

    #[tracing::instrument(skip(self, process))]
    pub fn spawn_boxed(&mut self, name: String, process: Box<dyn Process>) -> ActivityHandle {
        let id = self.scheduler.insert(name, process);
        debug!(activity = %id, now = ?self.now(), "activity spawned");
        self.record(id, TraceKind::Spawned);
        self.drive(id, Wake::Start);
        id
    }

    /// Spawns an activity once the clock reaches `at`.
    pub fn spawn_at<P: Process>(
        &mut self,
        at: SimTime,
        name: impl Into<String>,
        process: P,
    ) -> Result<(), SimError> {
        self.schedule_at(
            at,
            DeferredSpawn {
                name: name.into(),
                process: Box::new(process),
            },
        )
    }

    /// Schedules an arbitrary event. Scheduling in the past is an error.
    #[tracing::instrument(skip(self, ev), fields(event_type = std::any::type_name::<E>(), schedule_at = ?at))]
    pub fn schedule_at<E: Event>(&mut self, at: SimTime, ev: E) -> Result<(), SimError> {
        self.queue.schedule(at, Box::new(ev))?;
        Ok(())
    }

    pub fn schedule_in<E: Event>(&mut self, delay: SimTime, ev: E) -> Result<(), SimError> {
        let at = self.now().saturating_add(delay);
        self.schedule_at(at, ev)
    }

    /// Internal scheduling; callers only ever pass `at >= now`.
    pub(crate) fn push_event(&mut self, at: SimTime, ev: Box<dyn Event>) {
        if let Err(err) = self.queue.schedule(at, ev) {
            warn!(%err, "internal event dropped");
        }
    }

    /// Removes the pending resource request of `id`. The activity is resumed
    /// with [`Wake::Withdrawn`] at the current time. Returns `false` when the
    /// activity was not queued (already granted, or not waiting at all).
    pub fn withdraw(&mut self, id: ActivityId) -> Result<bool, SimError> {
        if self.scheduler.state(id).is_none() {
            return Err(SimError::UnknownActivity(id));
        }
        let Some(resource) = self.withdraw_pending(id) else {
            return Ok(false);
        };
        let epoch = self.bump_epoch(id);
        let now = self.now();
        self.schedule_resume(now, id, epoch, Wake::Withdrawn(resource));
        Ok(true)
    }

    /// Stops an activity: drops its pending request, returns every unit it
    /// holds and marks it failed with reason `cancelled`.
    pub fn cancel(&mut self, id: ActivityId) -> Result<(), SimError> {
        let state = self
            .scheduler
            .state(id)
            .ok_or(SimError::UnknownActivity(id))?;
        if state.is_terminal() {
            return Ok(());
        }
        let released = self.terminate(id, "cancelled");
        debug!(activity = %id, released, "activity cancelled");
        Ok(())
    }

    /// Processes one event. Returns its time, or `None` if the queue is empty.
    pub fn step(&mut self) -> Option<SimTime> {
        let item = self.queue.pop_next()?;
        let at = item.at;
        trace!(now = ?at, seq = item.seq, kind = item.kind(), "executing event");
        item.ev.execute(self);
        Some(at)
    }

    /// Runs until the queue is empty or the clock would reach `until`.
    ///
    /// Events stamped at or after `until` stay queued; the clock then rests
    /// at `until`, and a later call picks up where this one stopped.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self, until: Option<SimTime>) -> Result<RunSummary, SimError> {
        if let Some(until) = until {
            if until < self.now() {
                return Err(InvalidSchedule {
                    at: until,
                    now: self.now(),
                }
                .into());
            }
        }
        self.check_abort()?;

        info!(now = ?self.now(), pending = self.queue.len(), "simulation started");
        let mut events: u64 = 0;
        let stop = loop {
            match self.queue.peek_time() {
                None => break StopReason::Exhausted,
                Some(t) if until.is_some_and(|u| t >= u) => break StopReason::HorizonReached,
                Some(_) => {}
            }
            self.step();
            events += 1;
            self.check_abort()?;
        };
        if let Some(until) = until {
            self.queue.advance_to(until);
        }

        let summary = self.summary(events, stop);
        info!(
            final_time = ?summary.final_time,
            events = summary.events,
            finished = summary.finished,
            failed = summary.failed,
            suspended = summary.suspended,
            stop = ?summary.stop,
            "simulation finished"
        );
        Ok(summary)
    }

    fn summary(&self, events: u64, stop: StopReason) -> RunSummary {
        RunSummary {
            final_time: self.now(),
            events,
            spawned: self.scheduler.len(),
            finished: self.scheduler.finished(),
            failed: self.scheduler.failed(),
            suspended: self.scheduler.alive(),
            stop,
            faults: self.faults.clone(),
        }
    }

    fn check_abort(&self) -> Result<(), SimError> {
        match &self.aborted {
            Some(rec) => Err(SimError::Aborted {
                at: rec.at,
                activity: rec.activity,
                name: rec.name.clone(),
                fault: ActivityFault::new(rec.reason.clone()),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn record(&mut self, id: ActivityId, kind: TraceKind) {
        let Some(log) = self.trace.as_mut() else {
            return;
        };
        let name = self.scheduler.name(id).unwrap_or_default().to_string();
        log.push(TraceRecord {
            t_ns: self.queue.now().0,
            activity: id,
            name,
            kind,
        });
    }
}

struct DeferredSpawn {
    name: String,
    process: Box<dyn Process>,
}

impl Event for DeferredSpawn {
    fn execute(self: Box<Self>, env: &mut Environment) {
        let DeferredSpawn { name, process } = *self;
        env.spawn_boxed(name, process);
    }

    fn kind(&self) -> &'static str {
        "spawn"
    }
}

/// The view of the environment a process gets while it runs.
pub struct Context<'a> {
    env: &'a mut Environment,
    me: ActivityId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(env: &'a mut Environment, me: ActivityId) -> Self {
        Self { env, me }
    }

    pub fn id(&self) -> ActivityId {
        self.me
    }

    pub fn name(&self) -> &str {
        self.env.scheduler.name(self.me).unwrap_or_default()
    }

    pub fn now(&self) -> SimTime {
        self.env.now()
    }

    /// Returns one unit of `resource`. Not a suspension point; a waiter that
    /// receives the unit is resumed by a zero-delay event.
    pub fn release(&mut self, resource: ResourceId) -> Result<(), SimError> {
        self.env.release_unit(self.me, resource)
    }

    /// Units of `resource` this activity holds.
    pub fn holds(&self, resource: ResourceId) -> usize {
        self.env.scheduler.held(self.me, resource)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.env.resource(id)
    }

    /// Spawns a sibling activity; it runs to its first suspension point
    /// before this call returns.
    pub fn spawn<P: Process>(&mut self, name: impl Into<String>, process: P) -> ActivityHandle {
        self.env.spawn(name, process)
    }

    pub fn schedule_in<E: Event>(&mut self, delay: SimTime, ev: E) -> Result<(), SimError> {
        self.env.schedule_in(delay, ev)
    }
}
