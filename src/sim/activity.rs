//! Activities (logical processes)
//!
//! An activity is an explicit state machine. The scheduler calls
//! [`Process::resume`] with the reason it woke up, and the process answers
//! with the next [`Step`]: wait for time, wait for a resource unit, or stop.
//! Nothing inside `resume` may block; suspension only happens by returning.

use super::environment::Context;
use super::error::{InvalidSchedule, ResourceMisuse, SimError};
use super::resource::ResourceId;
use super::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Activity identifier, unique within one environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ActivityId(pub usize);

/// Handle returned by `spawn`; activities are addressed by id only.
pub type ActivityHandle = ActivityId;

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity#{}", self.0)
    }
}

/// Suspension state of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivityState {
    /// Executing, or granted a unit from the queue and due to resume at the
    /// current time.
    Running,
    WaitingForTime { until: SimTime },
    WaitingForResource { resource: ResourceId, since: SimTime },
    Finished,
    Failed { reason: String },
}

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityState::Finished | ActivityState::Failed { .. })
    }
}

/// Why a process is being resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// First call, right after spawn.
    Start,
    /// A `Step::Delay` elapsed.
    Timeout,
    /// A unit of the resource is now held by this activity.
    Granted(ResourceId),
    /// `Step::AcquireWithin` ran out of patience; the request was withdrawn.
    Reneged(ResourceId),
    /// The pending request was withdrawn from outside the activity.
    Withdrawn(ResourceId),
}

/// What a process wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspend until `now + delay`.
    Delay(SimTime),
    /// Take one unit, waiting in FIFO order if none is free.
    Acquire(ResourceId),
    /// Like `Acquire`, but give up after `patience`.
    AcquireWithin { resource: ResourceId, patience: SimTime },
    /// The activity has finished.
    Done,
}

/// Unhandled fault raised by a process body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ActivityFault {
    pub reason: String,
}

impl ActivityFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ResourceMisuse> for ActivityFault {
    fn from(err: ResourceMisuse) -> Self {
        Self::new(err.to_string())
    }
}

impl From<InvalidSchedule> for ActivityFault {
    fn from(err: InvalidSchedule) -> Self {
        Self::new(err.to_string())
    }
}

impl From<SimError> for ActivityFault {
    fn from(err: SimError) -> Self {
        Self::new(err.to_string())
    }
}

/// A suspendable unit of logic driven by the scheduler.
pub trait Process: 'static {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ActivityFault>;
}

impl<F> Process for F
where
    F: FnMut(&mut Context<'_>, Wake) -> Result<Step, ActivityFault> + 'static,
{
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ActivityFault> {
        self(ctx, wake)
    }
}

/// Pins a closure to the [`Process`] signature so its argument types are
/// inferred at the call site.
pub fn process_fn<F>(f: F) -> F
where
    F: FnMut(&mut Context<'_>, Wake) -> Result<Step, ActivityFault> + 'static,
{
    f
}

/// One instruction of a [`Script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Delay(SimTime),
    Acquire(ResourceId),
    Release(ResourceId),
    Fail(String),
}

/// A straight-line process: a fixed list of delays, acquires and releases.
///
/// If a pending acquire is withdrawn the script stops; any unit it still holds
/// is returned by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct Script {
    ops: Vec<Op>,
    pc: usize,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, d: SimTime) -> Self {
        self.ops.push(Op::Delay(d));
        self
    }

    pub fn acquire(mut self, r: ResourceId) -> Self {
        self.ops.push(Op::Acquire(r));
        self
    }

    pub fn release(mut self, r: ResourceId) -> Self {
        self.ops.push(Op::Release(r));
        self
    }

    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.ops.push(Op::Fail(reason.into()));
        self
    }

    /// Acquire, hold for `d`, release.
    pub fn hold(self, r: ResourceId, d: SimTime) -> Self {
        self.acquire(r).delay(d).release(r)
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

impl Process for Script {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ActivityFault> {
        if let Wake::Reneged(r) | Wake::Withdrawn(r) = wake {
            debug!(activity = %ctx.id(), resource = %r, "script request withdrawn, stopping");
            return Ok(Step::Done);
        }
        while let Some(op) = self.ops.get(self.pc) {
            self.pc += 1;
            match op {
                Op::Delay(d) => return Ok(Step::Delay(*d)),
                Op::Acquire(r) => return Ok(Step::Acquire(*r)),
                Op::Release(r) => ctx.release(*r)?,
                Op::Fail(reason) => return Err(ActivityFault::new(reason.clone())),
            }
        }
        Ok(Step::Done)
    }
}
