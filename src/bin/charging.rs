//! Battery charging station
//!
//! Deterministic: cars drive in, wait for a free spot, charge, leave.

use clap::Parser;
use dessim_rs::scenario::ResourceReport;
use dessim_rs::scenario::charging::{self, ChargingConfig, ChargingReport};
use dessim_rs::sim::{EnvConfig, FaultPolicy, RunSummary};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "charging", about = "Charging station: cars share a few charging spots")]
struct Args {
    /// JSON scenario config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    spots: Option<usize>,
    #[arg(long)]
    cars: Option<usize>,
    /// Car i arrives after i * spacing seconds of driving
    #[arg(long)]
    drive_spacing_s: Option<u64>,
    #[arg(long)]
    charge_s: Option<u64>,
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
    config: &'a ChargingConfig,
    summary: &'a RunSummary,
    report: &'a ChargingReport,
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
    let mut cfg: ChargingConfig = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).expect("read charging config");
            serde_json::from_str(&raw).expect("parse charging config")
        }
        None => ChargingConfig::default(),
    };
    if let Some(v) = args.spots {
        cfg.spots = v;
    }
    if let Some(v) = args.cars {
        cfg.cars = v;
    }
    if let Some(v) = args.drive_spacing_s {
        cfg.drive_spacing_s = v;
    }
    if let Some(v) = args.charge_s {
        cfg.charge_s = v;
    }

    let env_cfg = EnvConfig {
        fault_policy: if args.abort_on_fault {
            FaultPolicy::Abort
        } else {
            FaultPolicy::Continue
        },
        trace: args.trace_json.is_some(),
    };

    let mut run = match charging::run(&cfg, env_cfg) {
        Ok(run) => run,
        Err(err) => {
            eprintln!("charging: {err}");
            std::process::exit(1);
        }
    };

    for (i, v) in run.report.visits.iter().enumerate() {
        println!(
            "car {i}: arrive={} start={} leave={}",
            v.arrive.as_secs_f64(),
            v.start.as_secs_f64(),
            v.leave.as_secs_f64()
        );
    }
    println!(
        "done @ {}s, finished={}, failed={}",
        run.summary.final_time.as_secs_f64(),
        run.summary.finished,
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
