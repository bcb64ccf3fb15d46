//! NAND flash controller simulation
//!
//! Commands contend for the controller CPU, the channel and the plane's
//! page registers.

use clap::Parser;
use dessim_rs::scenario::ResourceReport;
use dessim_rs::scenario::nand::{self, NandConfig, NandReport, OpMix};
use dessim_rs::sim::{EnvConfig, FaultPolicy, RunSummary};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "nand-ctrl",
    about = "NAND controller: commands contend for CPU, channel and registers"
)]
struct Args {
    /// JSON scenario config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    registers: Option<usize>,
    /// Channel transfer time (us)
    #[arg(long)]
    xfer_us: Option<u64>,
    #[arg(long)]
    read_us: Option<u64>,
    #[arg(long)]
    write_us: Option<u64>,
    #[arg(long)]
    erase_us: Option<u64>,
    #[arg(long)]
    initial_commands: Option<u64>,
    /// Mean gap between new commands (us)
    #[arg(long)]
    t_inter_us: Option<u64>,
    /// Opcode weights as read,write,erase (e.g. 3,1,0)
    #[arg(long)]
    mix: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// Simulated microseconds to observe
    #[arg(long)]
    sim_time_us: Option<u64>,
    #[arg(long)]
    abort_on_fault: bool,
    #[arg(long)]
    trace_json: Option<PathBuf>,
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Serialize)]
struct Output<'a> {
    config: &'a NandConfig,
    summary: &'a RunSummary,
    report: &'a NandReport,
    resources: &'a [ResourceReport],
}

fn parse_mix(raw: &str) -> Result<OpMix, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("mix must be read,write,erase: {raw}"));
    }
    let num = |s: &str| s.parse::<u32>().map_err(|e| format!("bad weight {s:?}: {e}"));
    Ok(OpMix {
        read: num(parts[0])?,
        write: num(parts[1])?,
        erase: num(parts[2])?,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let mut cfg: NandConfig = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).expect("read nand config");
            serde_json::from_str(&raw).expect("parse nand config")
        }
        None => NandConfig::default(),
    };
    if let Some(v) = args.registers {
        cfg.registers = v;
    }
    if let Some(v) = args.xfer_us {
        cfg.xfer_us = v;
    }
    if let Some(v) = args.read_us {
        cfg.read_us = v;
    }
    if let Some(v) = args.write_us {
        cfg.write_us = v;
    }
    if let Some(v) = args.erase_us {
        cfg.erase_us = v;
    }
    if let Some(v) = args.initial_commands {
        cfg.initial_commands = v;
    }
    if let Some(v) = args.t_inter_us {
        cfg.t_inter_us = v;
    }
    if let Some(raw) = &args.mix {
        match parse_mix(raw) {
            Ok(mix) => cfg.mix = mix,
            Err(err) => {
                eprintln!("nand_ctrl: {err}");
                std::process::exit(2);
            }
        }
    }
    if let Some(v) = args.seed {
        cfg.seed = v;
    }
    if let Some(v) = args.sim_time_us {
        cfg.sim_time_us = v;
    }

    let env_cfg = EnvConfig {
        fault_policy: if args.abort_on_fault {
            FaultPolicy::Abort
        } else {
            FaultPolicy::Continue
        },
        trace: args.trace_json.is_some(),
    };

    let mut run = match nand::run(&cfg, env_cfg) {
        Ok(run) => run,
        Err(err) => {
            eprintln!("nand_ctrl: {err}");
            std::process::exit(1);
        }
    };

    println!(
        "done @ {}us, arrived={}, completed={} (r={} w={} e={}), mean_latency={}us",
        run.summary.final_time.0 / 1_000,
        run.report.arrived,
        run.report.completed,
        run.report.reads,
        run.report.writes,
        run.report.erases,
        run.report.mean_latency().0 / 1_000
    );
    for r in &run.resources {
        println!(
            "resource {}: capacity={} grants={} max_queue={} mean_wait={}us",
            r.name,
            r.capacity,
            r.grants,
            r.max_queue_len,
            r.mean_wait_ns / 1_000
        );
    }

    if let Some(path) = args.summary_json {
        let out = Output {
            config: &cfg,
            summary: &run.summary,
            report: &run.report,
            resources: &run.resources,
        };
        let json = serde_json::to_string_pretty(&out).expect("serialize summary");
        fs::write(&path, json).expect("write summary json");
        eprintln!("wrote summary to {}", path.display());
    }
    if let Some(path) = args.trace_json {
        if let Some(trace) = run.env.take_trace() {
            trace.write_json(&path).expect("write trace json");
            eprintln!("wrote trace to {}", path.display());
        }
    }
}
