//! Carwash simulation
//!
//! Cars queue for a limited number of washing machines.

use clap::Parser;
use dessim_rs::scenario::carwash::{self, CarwashConfig, CarwashReport};
use dessim_rs::scenario::{ResourceReport, as_minutes};
use dessim_rs::sim::{EnvConfig, FaultPolicy, RunSummary};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "carwash", about = "Carwash: cars compete for washing machines")]
struct Args {
    /// JSON scenario config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    machines: Option<usize>,
    /// Minutes per wash
    #[arg(long)]
    wash_min: Option<f64>,
    /// Mean minutes between arrivals
    #[arg(long)]
    t_inter_min: Option<u64>,
    #[arg(long)]
    initial_cars: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Simulated minutes to observe
    #[arg(long)]
    sim_time_min: Option<f64>,
    /// Stop the run at the first failed activity
    #[arg(long)]
    abort_on_fault: bool,
    /// Write the scheduler trace as JSON
    #[arg(long)]
    trace_json: Option<PathBuf>,
    /// Write config, run summary and report as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Serialize)]
struct Output<'a> {
    config: &'a CarwashConfig,
    summary: &'a RunSummary,
    report: &'a CarwashReport,
    resources: &'a [ResourceReport],
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
    let mut cfg: CarwashConfig = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).expect("read carwash config");
            serde_json::from_str(&raw).expect("parse carwash config")
        }
        None => CarwashConfig::default(),
    };
    if let Some(v) = args.machines {
        cfg.machines = v;
    }
    if let Some(v) = args.wash_min {
        cfg.wash_min = v;
    }
    if let Some(v) = args.t_inter_min {
        cfg.t_inter_min = v;
    }
    if let Some(v) = args.initial_cars {
        cfg.initial_cars = v;
    }
    if let Some(v) = args.seed {
        cfg.seed = v;
    }
    if let Some(v) = args.sim_time_min {
        cfg.sim_time_min = v;
    }

    let env_cfg = EnvConfig {
        fault_policy: if args.abort_on_fault {
            FaultPolicy::Abort
        } else {
            FaultPolicy::Continue
        },
        trace: args.trace_json.is_some(),
    };

    println!("Carwash");
    let mut run = match carwash::run(&cfg, env_cfg) {
        Ok(run) => run,
        Err(err) => {
            eprintln!("carwash: {err}");
            std::process::exit(1);
        }
    };

    println!(
        "done @ {:.2} min, arrived={}, washed={}, mean_wait={:.2} min, failed={}",
        as_minutes(run.summary.final_time),
        run.report.arrived,
        run.report.washed,
        run.report.mean_wait_min(),
        run.summary.failed
    );

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
