//! Kernel error types.

use super::activity::{ActivityFault, ActivityId};
use super::resource::ResourceId;
use super::time::SimTime;
use thiserror::Error;

/// An event was scheduled strictly before the current clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot schedule at {at} before current time {now}")]
pub struct InvalidSchedule {
    pub at: SimTime,
    pub now: SimTime,
}

/// A release that does not match an outstanding grant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{activity} released {resource} ({name}) without holding a unit")]
pub struct ResourceMisuse {
    pub resource: ResourceId,
    pub name: String,
    pub activity: ActivityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error(transparent)]
    InvalidSchedule(#[from] InvalidSchedule),
    #[error(transparent)]
    ResourceMisuse(#[from] ResourceMisuse),
    #[error("resource capacity must be positive (resource {name})")]
    InvalidCapacity { name: String },
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),
    #[error("unknown activity {0}")]
    UnknownActivity(ActivityId),
    #[error("run aborted at {at}: {activity} ({name}) failed: {fault}")]
    Aborted {
        at: SimTime,
        activity: ActivityId,
        name: String,
        fault: ActivityFault,
    },
}
