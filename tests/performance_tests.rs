use assert_cmd::cargo_bin;
use std::process::Command;

mod common;

#[test]
fn test_large_scenario_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("large_scenario.csv");
    common::generate_settled_scenario(&output_path, 20_000).expect("Failed to generate scenario");

    let output = Command::new(cargo_bin!("escrowd"))
        .arg("replay")
        .arg(&output_path)
        .env("ESCROWD_LOG_LEVEL", "warn")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to replay large scenario");

    let stdout = String::from_utf8_lossy(&output.stdout);
    // Header plus one row per invoice, all released by the final sweep.
    assert_eq!(stdout.lines().count(), 20_001);
    assert!(stdout.lines().skip(1).all(|line| line.contains(",RELEASED,")));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_large_scenario_streaming_db() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("large_scenario.csv");
    common::generate_scenario(&output_path, 5_000).expect("Failed to generate scenario");

    let status = Command::new(cargo_bin!("escrowd"))
        .arg("replay")
        .arg(&output_path)
        .arg("--db-path")
        .arg(dir.path().join("test_db"))
        .env("ESCROWD_LOG_LEVEL", "warn")
        .status()
        .expect("Failed to execute command");
    assert!(status.success(), "Binary failed to replay scenario into RocksDB");
}
