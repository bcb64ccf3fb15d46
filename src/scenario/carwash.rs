//! Carwash
//!
//! A carwash has a limited number of washing machines. Cars arrive at
//! jittered intervals, queue for a free machine, get washed for a fixed time
//! and leave.

use super::{ResourceReport, ScenarioRun, SharedRng, as_minutes, jitter, minutes, seeded_rng};
use crate::sim::{
    ActivityFault, Context, EnvConfig, Environment, Process, ResourceId, SimError, SimTime, Step,
    Wake,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarwashConfig {
    /// Washing machines that work in parallel.
    pub machines: usize,
    /// Minutes one wash takes.
    pub wash_min: f64,
    /// Mean minutes between arrivals; each gap is uniform in `t_inter ± 2`.
    pub t_inter_min: u64,
    /// Cars present when the simulation starts.
    pub initial_cars: u64,
    pub seed: u64,
    /// Observation window in minutes.
    pub sim_time_min: f64,
}

impl Default for CarwashConfig {
    fn default() -> Self {
        Self {
            machines: 4,
            wash_min: 5.0,
            t_inter_min: 2,
            initial_cars: 4,
            seed: super::DEFAULT_SEED,
            sim_time_min: 100.0,
        }
    }
}

const ARRIVAL_SPREAD_MIN: u64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CarwashReport {
    pub arrived: u64,
    pub entered: u64,
    pub washed: u64,
    /// Sum of queueing delays of the cars that got a machine (minutes).
    pub total_wait_min: f64,
    /// Percent of dirt removed per washed car, in completion order.
    pub dirt_removed_pct: Vec<u8>,
}

impl CarwashReport {
    pub fn mean_wait_min(&self) -> f64 {
        if self.entered == 0 {
            return 0.0;
        }
        self.total_wait_min / self.entered as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Arriving,
    Queued,
    Washing,
}

struct Car {
    name: String,
    machine: ResourceId,
    wash: SimTime,
    arrived_at: SimTime,
    stage: Stage,
    rng: SharedRng,
    report: Rc<RefCell<CarwashReport>>,
}

impl Process for Car {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ActivityFault> {
        let now = ctx.now();
        match (self.stage, wake) {
            (Stage::Arriving, Wake::Start) => {
                info!("{} arrives at the carwash at {:.2}.", self.name, as_minutes(now));
                self.arrived_at = now;
                self.report.borrow_mut().arrived += 1;
                self.stage = Stage::Queued;
                Ok(Step::Acquire(self.machine))
            }
            (Stage::Queued, Wake::Granted(r)) if r == self.machine => {
                info!("{} enters the carwash at {:.2}.", self.name, as_minutes(now));
                let mut report = self.report.borrow_mut();
                report.entered += 1;
                report.total_wait_min += as_minutes(now.saturating_sub(self.arrived_at));
                self.stage = Stage::Washing;
                Ok(Step::Delay(self.wash))
            }
            (Stage::Washing, Wake::Timeout) => {
                let pct: u8 = self.rng.borrow_mut().gen_range(50..=99);
                info!("Carwash removed {}% of {}'s dirt.", pct, self.name);
                ctx.release(self.machine)?;
                info!("{} leaves the carwash at {:.2}.", self.name, as_minutes(now));
                let mut report = self.report.borrow_mut();
                report.washed += 1;
                report.dirt_removed_pct.push(pct);
                Ok(Step::Done)
            }
            (stage, wake) => Err(ActivityFault::new(format!(
                "{}: unexpected {wake:?} while {stage:?}",
                self.name
            ))),
        }
    }
}

/// Creates the machines, the initial cars and the arrival generator.
pub fn build(
    env: &mut Environment,
    cfg: &CarwashConfig,
) -> Result<Rc<RefCell<CarwashReport>>, SimError> {
    let machine = env.add_resource("machine", cfg.machines)?;
    let rng = seeded_rng(cfg.seed);
    let report = Rc::new(RefCell::new(CarwashReport::default()));
    let wash = minutes(cfg.wash_min);

    let make_car = {
        let rng = Rc::clone(&rng);
        let report = Rc::clone(&report);
        move |n: u64| -> (String, Box<dyn Process>) {
            let name = format!("Car {n}");
            let car: Box<dyn Process> = Box::new(Car {
                name: name.clone(),
                machine,
                wash,
                arrived_at: SimTime::ZERO,
                stage: Stage::Arriving,
                rng: Rc::clone(&rng),
                report: Rc::clone(&report),
            });
            (name, car)
        }
    };

    for n in 0..cfg.initial_cars {
        let (name, car) = make_car(n);
        env.spawn_boxed(name, car);
    }

    let first = cfg.initial_cars;
    let t_inter = cfg.t_inter_min;
    let gap_rng = Rc::clone(&rng);
    env.spawn_periodic(
        move || Some(minutes(jitter(&gap_rng, t_inter, ARRIVAL_SPREAD_MIN) as f64)),
        move |n| make_car(first + n),
    )?;
    Ok(report)
}

pub fn run(
    cfg: &CarwashConfig,
    env_cfg: EnvConfig,
) -> Result<ScenarioRun<CarwashReport>, SimError> {
    let mut env = Environment::with_config(env_cfg);
    let report = build(&mut env, cfg)?;
    let summary = env.run(Some(minutes(cfg.sim_time_min)))?;
    let report = report.borrow().clone();
    let resources = ResourceReport::collect(&env);
    Ok(ScenarioRun {
        env,
        summary,
        report,
        resources,
    })
}
