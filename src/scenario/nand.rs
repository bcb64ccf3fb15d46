//! NAND flash controller
//!
//! Storage commands flow through three contended stages: the controller CPU,
//! the channel to the die, and a plane's page register. A command holds the
//! CPU for its whole life, holds the channel from the transfer until the
//! plane operation ends, and holds a register only while the plane operates.
//! Units are returned innermost first.

use super::{ResourceReport, ScenarioRun, SharedRng, jitter, seeded_rng};
use crate::sim::{
    ActivityFault, Context, EnvConfig, Environment, Process, ResourceId, SimError, SimTime, Step,
    Wake,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    Read,
    Write,
    Erase,
}

/// Relative weights used to draw each command's opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpMix {
    pub read: u32,
    pub write: u32,
    pub erase: u32,
}

impl Default for OpMix {
    fn default() -> Self {
        Self {
            read: 1,
            write: 0,
            erase: 0,
        }
    }
}

impl OpMix {
    // u64 so three u32 weights can never overflow
    fn total(&self) -> u64 {
        u64::from(self.read) + u64::from(self.write) + u64::from(self.erase)
    }

    fn draw(&self, rng: &SharedRng) -> Opcode {
        let total = self.total();
        if total == 0 {
            return Opcode::Read;
        }
        let x = rng.borrow_mut().gen_range(0..total);
        let read = u64::from(self.read);
        if x < read {
            Opcode::Read
        } else if x < read + u64::from(self.write) {
            Opcode::Write
        } else {
            Opcode::Erase
        }
    }
}

/// Timings in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NandConfig {
    pub cpus: usize,
    pub channels: usize,
    /// Page registers per plane.
    pub registers: usize,
    pub xfer_us: u64,
    pub read_us: u64,
    pub write_us: u64,
    pub erase_us: u64,
    pub initial_commands: u64,
    /// Mean gap between new commands; each gap is uniform in `t_inter ± 2`.
    pub t_inter_us: u64,
    pub mix: OpMix,
    pub seed: u64,
    pub sim_time_us: u64,
}

impl Default for NandConfig {
    fn default() -> Self {
        Self {
            cpus: 1,
            channels: 1,
            registers: 1,
            xfer_us: 10,
            read_us: 65,
            write_us: 45,
            erase_us: 2_000,
            initial_commands: 4,
            t_inter_us: 2,
            mix: OpMix::default(),
            seed: super::DEFAULT_SEED,
            sim_time_us: 10_000,
        }
    }
}

impl NandConfig {
    pub fn op_time(&self, op: Opcode) -> SimTime {
        let us = match op {
            Opcode::Read => self.read_us,
            Opcode::Write => self.write_us,
            Opcode::Erase => self.erase_us,
        };
        SimTime::from_micros(us)
    }
}

const ARRIVAL_SPREAD_US: u64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NandReport {
    pub arrived: u64,
    pub completed: u64,
    pub reads: u64,
    pub writes: u64,
    pub erases: u64,
    /// Sum of arrival-to-completion latencies of completed commands.
    pub total_latency: SimTime,
}

impl NandReport {
    pub fn mean_latency(&self) -> SimTime {
        if self.completed == 0 {
            return SimTime::ZERO;
        }
        SimTime(self.total_latency.0 / self.completed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Units {
    cpu: ResourceId,
    channel: ResourceId,
    register: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Arriving,
    WaitCpu,
    WaitChannel,
    Transfer,
    WaitRegister,
    Operating,
}

struct Command {
    name: String,
    op: Opcode,
    units: Units,
    xfer: SimTime,
    op_time: SimTime,
    arrived_at: SimTime,
    stage: Stage,
    report: Rc<RefCell<NandReport>>,
}

impl Process for Command {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ActivityFault> {
        let now = ctx.now();
        let us = now.as_secs_f64() * 1e6;
        let u = self.units;
        match (self.stage, wake) {
            (Stage::Arriving, Wake::Start) => {
                info!("{} arrives at the NANDCtrl at {:.2}.", self.name, us);
                self.arrived_at = now;
                self.report.borrow_mut().arrived += 1;
                self.stage = Stage::WaitCpu;
                Ok(Step::Acquire(u.cpu))
            }
            (Stage::WaitCpu, Wake::Granted(r)) if r == u.cpu => {
                info!("{} enters the NANDCtrl at {:.2}.", self.name, us);
                self.stage = Stage::WaitChannel;
                Ok(Step::Acquire(u.channel))
            }
            (Stage::WaitChannel, Wake::Granted(r)) if r == u.channel => {
                info!("{} sent to the chnl at {:.2}.", self.name, us);
                self.stage = Stage::Transfer;
                Ok(Step::Delay(self.xfer))
            }
            (Stage::Transfer, Wake::Timeout) => {
                self.stage = Stage::WaitRegister;
                Ok(Step::Acquire(u.register))
            }
            (Stage::WaitRegister, Wake::Granted(r)) if r == u.register => {
                info!("{} sent to the plane at {:.2} ({:?}).", self.name, us, self.op);
                self.stage = Stage::Operating;
                Ok(Step::Delay(self.op_time))
            }
            (Stage::Operating, Wake::Timeout) => {
                ctx.release(u.register)?;
                info!("{} return to the chnl at {:.2}.", self.name, us);
                ctx.release(u.channel)?;
                info!("{} return to the ctrl at {:.2}.", self.name, us);
                ctx.release(u.cpu)?;
                info!("{} leaves the NANDCtrl at {:.2}.", self.name, us);

                let mut report = self.report.borrow_mut();
                report.completed += 1;
                report.total_latency = report
                    .total_latency
                    .saturating_add(now.saturating_sub(self.arrived_at));
                match self.op {
                    Opcode::Read => report.reads += 1,
                    Opcode::Write => report.writes += 1,
                    Opcode::Erase => report.erases += 1,
                }
                Ok(Step::Done)
            }
            (stage, wake) => Err(ActivityFault::new(format!(
                "{}: unexpected {wake:?} while {stage:?}",
                self.name
            ))),
        }
    }
}

/// Creates CPU, channel and register pools, the initial commands and the
/// command generator.
pub fn build(
    env: &mut Environment,
    cfg: &NandConfig,
) -> Result<Rc<RefCell<NandReport>>, SimError> {
    let units = Units {
        cpu: env.add_resource("cpu", cfg.cpus)?,
        channel: env.add_resource("channel", cfg.channels)?,
        register: env.add_resource("register", cfg.registers)?,
    };
    let rng = seeded_rng(cfg.seed);
    let report = Rc::new(RefCell::new(NandReport::default()));

    let make_cmd = {
        let cfg = cfg.clone();
        let rng = Rc::clone(&rng);
        let report = Rc::clone(&report);
        move |n: u64| -> (String, Box<dyn Process>) {
            let op = cfg.mix.draw(&rng);
            let name = format!("Cmd {n}");
            debug!(name = %name, ?op, "command created");
            let cmd: Box<dyn Process> = Box::new(Command {
                name: name.clone(),
                op,
                units,
                xfer: SimTime::from_micros(cfg.xfer_us),
                op_time: cfg.op_time(op),
                arrived_at: SimTime::ZERO,
                stage: Stage::Arriving,
                report: Rc::clone(&report),
            });
            (name, cmd)
        }
    };

    for n in 0..cfg.initial_commands {
        let (name, cmd) = make_cmd(n);
        env.spawn_boxed(name, cmd);
    }

    let first = cfg.initial_commands;
    let t_inter = cfg.t_inter_us;
    let gap_rng = Rc::clone(&rng);
    env.spawn_periodic(
        move || Some(SimTime::from_micros(jitter(&gap_rng, t_inter, ARRIVAL_SPREAD_US))),
        move |n| make_cmd(first + n),
    )?;
    Ok(report)
}

pub fn run(
    cfg: &NandConfig,
    env_cfg: EnvConfig,
) -> Result<ScenarioRun<NandReport>, SimError> {
    let mut env = Environment::with_config(env_cfg);
    let report = build(&mut env, cfg)?;
    let summary = env.run(Some(SimTime::from_micros(cfg.sim_time_us)))?;
    let report = report.borrow().clone();
    let resources = ResourceReport::collect(&env);
    Ok(ScenarioRun {
        env,
        summary,
        report,
        resources,
    })
}
