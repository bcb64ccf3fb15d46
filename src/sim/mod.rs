//! Simulation kernel
//!
//! Virtual clock and event queue, cooperative activity scheduler, and
//! capacity-bounded resources, composed by [`Environment`].

mod activity;
mod environment;
mod error;
mod event;
mod periodic;
mod queue;
mod resource;
mod scheduled_event;
mod scheduler;
mod time;

pub use activity::{
    ActivityFault, ActivityHandle, ActivityId, ActivityState, Op, Process, Script, Step, Wake,
    process_fn,
};
pub use environment::{
    Context, EnvConfig, Environment, FaultPolicy, FaultRecord, RunSummary, StopReason,
};
pub use error::{InvalidSchedule, ResourceMisuse, SimError};
pub use event::Event;
pub use periodic::{Factory, Interval, every, every_n};
pub use queue::EventQueue;
pub use resource::{Acquire, Request, Resource, ResourceId, ResourceStats};
pub use scheduled_event::ScheduledEvent;
pub use scheduler::Scheduler;
pub use time::SimTime;
