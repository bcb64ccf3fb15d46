use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "dessim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn charging_prints_each_visit() {
    let output = Command::new(env!("CARGO_BIN_EXE_charging"))
        .env("RUST_LOG", "warn")
        .output()
        .expect("run charging");
    assert!(
        output.status.success(),
        "charging failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in [
        "car 0: arrive=0 start=0 leave=5",
        "car 1: arrive=2 start=2 leave=7",
        "car 2: arrive=4 start=5 leave=10",
        "car 3: arrive=6 start=7 leave=12",
        "done @ 12s, finished=4, failed=0",
    ] {
        assert!(stdout.contains(line), "missing {line:?} in: {stdout}");
    }
}

#[test]
fn charging_one_spot_serializes_cars() {
    let output = Command::new(env!("CARGO_BIN_EXE_charging"))
        .env("RUST_LOG", "warn")
        .args(["--spots", "1", "--cars", "3"])
        .output()
        .expect("run charging");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("car 2: arrive=4 start=10 leave=15"), "stdout: {stdout}");
    assert!(stdout.contains("done @ 15s"), "stdout: {stdout}");
}

#[test]
fn charging_config_flags_override_and_summary_json() {
    let dir = unique_temp_dir("charging-summary");
    let config = dir.join("charging.json");
    fs::write(&config, r#"{ "spots": 1, "cars": 3, "charge_s": 9 }"#).expect("write config");
    let summary = dir.join("summary.json");

    let output = Command::new(env!("CARGO_BIN_EXE_charging"))
        .env("RUST_LOG", "warn")
        .args([
            "--config",
            config.to_str().unwrap(),
            "--charge-s",
            "5",
            "--summary-json",
            summary.to_str().unwrap(),
        ])
        .output()
        .expect("run charging");
    assert!(
        output.status.success(),
        "charging failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("done @ 15s, finished=3"), "stdout: {stdout}");

    let raw = fs::read_to_string(&summary).expect("read summary.json");
    let v: Value = serde_json::from_str(&raw).expect("parse summary.json");
    assert_eq!(v["config"]["spots"], 1);
    assert_eq!(v["config"]["cars"], 3);
    assert_eq!(v["config"]["charge_s"], 5);
    assert_eq!(v["config"]["drive_spacing_s"], 2);
    assert_eq!(v["summary"]["stop"], "exhausted");
    assert_eq!(v["summary"]["finished"], 3);
    let visits = v["report"]["visits"].as_array().expect("visits");
    assert_eq!(visits.len(), 3);
    assert_eq!(visits[2]["start"], 10_000_000_000u64);
    assert_eq!(v["resources"][0]["name"], "bcs");
    assert_eq!(v["resources"][0]["capacity"], 1);

    let _ = fs::remove_dir_all(&dir);
}
