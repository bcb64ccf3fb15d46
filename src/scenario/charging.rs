//! Battery charging station
//!
//! Electric cars drive to a station with a few charging spots, wait for a
//! free spot, charge and leave. Fully deterministic: no random input.

use super::{ResourceReport, ScenarioRun};
use crate::sim::{
    ActivityFault, Context, EnvConfig, Environment, ResourceId, SimError, SimTime, Step, Wake,
    process_fn,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

/// All durations are in seconds of simulated time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargingConfig {
    pub spots: usize,
    pub cars: usize,
    /// Car `i` drives `i * drive_spacing` before arriving.
    pub drive_spacing_s: u64,
    pub charge_s: u64,
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            spots: 2,
            cars: 4,
            drive_spacing_s: 2,
            charge_s: 5,
        }
    }
}

/// Arrival, start of charging and departure of one car.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChargeVisit {
    pub arrive: SimTime,
    pub start: SimTime,
    pub leave: SimTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChargingReport {
    /// Indexed by car number.
    pub visits: Vec<ChargeVisit>,
}

/// Spawns the cars. Each one is a closure process.
pub fn build(
    env: &mut Environment,
    cfg: &ChargingConfig,
) -> Result<Rc<RefCell<ChargingReport>>, SimError> {
    let bcs = env.add_resource("bcs", cfg.spots)?;
    let report = Rc::new(RefCell::new(ChargingReport {
        visits: vec![ChargeVisit::default(); cfg.cars],
    }));

    for i in 0..cfg.cars {
        let driving = SimTime::from_secs(i as u64 * cfg.drive_spacing_s);
        let charge = SimTime::from_secs(cfg.charge_s);
        let report = Rc::clone(&report);
        env.spawn(format!("Car {i}"), car(i, bcs, driving, charge, report));
    }
    Ok(report)
}

fn car(
    i: usize,
    bcs: ResourceId,
    driving: SimTime,
    charge: SimTime,
    report: Rc<RefCell<ChargingReport>>,
) -> impl FnMut(&mut Context<'_>, Wake) -> Result<Step, ActivityFault> + 'static {
    process_fn(move |ctx: &mut Context<'_>, wake: Wake| {
        let now = ctx.now();
        match wake {
            Wake::Start => Ok(Step::Delay(driving)),
            Wake::Timeout if ctx.holds(bcs) == 0 => {
                info!("{} arriving at {}", ctx.name(), now.as_secs_f64());
                report.borrow_mut().visits[i].arrive = now;
                Ok(Step::Acquire(bcs))
            }
            Wake::Granted(_) => {
                info!("{} starting to charge at {}", ctx.name(), now.as_secs_f64());
                report.borrow_mut().visits[i].start = now;
                Ok(Step::Delay(charge))
            }
            Wake::Timeout => {
                info!("{} leaving the bcs at {}", ctx.name(), now.as_secs_f64());
                report.borrow_mut().visits[i].leave = now;
                ctx.release(bcs)?;
                Ok(Step::Done)
            }
            other => Err(ActivityFault::new(format!("unexpected {other:?}"))),
        }
    })
}

/// Runs until every car has left.
pub fn run(
    cfg: &ChargingConfig,
    env_cfg: EnvConfig,
) -> Result<ScenarioRun<ChargingReport>, SimError> {
    let mut env = Environment::with_config(env_cfg);
    let report = build(&mut env, cfg)?;
    let summary = env.run(None)?;
    let report = report.borrow().clone();
    let resources = ResourceReport::collect(&env);
    Ok(ScenarioRun {
        env,
        summary,
        report,
        resources,
    })
}
