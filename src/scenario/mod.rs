//! Scenario adapters
//!
//! Each scenario wires activities to resources through the public kernel API
//! and owns its own random source; the kernel never draws random numbers.

pub mod carwash;
pub mod charging;
pub mod nand;

use crate::sim::{Environment, RunSummary, SimTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

pub const DEFAULT_SEED: u64 = 42;

/// Scenario-owned RNG shared between arrival generator and activities.
pub type SharedRng = Rc<RefCell<ChaCha8Rng>>;

pub fn seeded_rng(seed: u64) -> SharedRng {
    Rc::new(RefCell::new(ChaCha8Rng::seed_from_u64(seed)))
}

/// Uniform integer in `[center - spread, center + spread]`, clamped at zero.
pub fn jitter(rng: &SharedRng, center: u64, spread: u64) -> u64 {
    let lo = center.saturating_sub(spread);
    let hi = center.saturating_add(spread);
    rng.borrow_mut().gen_range(lo..=hi)
}

pub fn minutes(m: f64) -> SimTime {
    SimTime::from_secs_f64(m * 60.0)
}

pub fn as_minutes(t: SimTime) -> f64 {
    t.as_secs_f64() / 60.0
}

/// Per-resource figures for the end-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub name: String,
    pub capacity: usize,
    pub in_use: usize,
    pub queued: usize,
    pub grants: u64,
    pub immediate_grants: u64,
    pub max_queue_len: usize,
    pub mean_wait_ns: u64,
}

impl ResourceReport {
    pub fn collect(env: &Environment) -> Vec<ResourceReport> {
        env.resources()
            .map(|r| ResourceReport {
                name: r.name().to_string(),
                capacity: r.capacity(),
                in_use: r.in_use(),
                queued: r.queue_len(),
                grants: r.stats().grants,
                immediate_grants: r.stats().immediate_grants,
                max_queue_len: r.stats().max_queue_len,
                mean_wait_ns: r.stats().mean_wait().0,
            })
            .collect()
    }
}

/// Everything a scenario run leaves behind.
pub struct ScenarioRun<R> {
    pub env: Environment,
    pub summary: RunSummary,
    pub report: R,
    pub resources: Vec<ResourceReport>,
}
