use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn run(rows: &[[&str; 8]]) -> assert_cmd::assert::Assert {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("boundary_test.csv");
    let mut wtr = csv::Writer::from_path(&output_path).unwrap();
    wtr.write_record(["type", "at", "invoice", "user", "counterparty", "amount", "currency", "choice"])
        .unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("escrowd"));
    cmd.arg("replay").arg(&output_path);
    cmd.assert()
}

#[test]
fn test_dispute_at_exact_deadline_is_rejected() {
    run(&[
        ["pay", "2026-03-01T12:00:00Z", "inv-1", "alice", "bob", "10", "USD", ""],
        ["dispute", "2026-03-15T12:00:00Z", "inv-1", "alice", "", "", "", ""],
    ])
    .success()
    .stderr(predicate::str::contains("dispute window closed"))
    .stdout(predicate::str::contains("inv-1,10,USD,HELD,2026-03-15T12:00:00Z,"));
}

#[test]
fn test_dispute_one_second_before_deadline_is_accepted() {
    run(&[
        ["pay", "2026-03-01T12:00:00Z", "inv-1", "alice", "bob", "10", "USD", ""],
        ["dispute", "2026-03-15T11:59:59Z", "inv-1", "alice", "", "", "", ""],
        ["sweep", "2026-03-16T00:00:00Z", "", "", "", "", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("inv-1,10,USD,HELD,,"));
}

#[test]
fn test_sweep_at_exact_deadline_releases() {
    run(&[
        ["pay", "2026-03-01T12:00:00Z", "inv-1", "alice", "bob", "10", "USD", ""],
        ["sweep", "2026-03-15T12:00:00Z", "", "", "", "", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("inv-1,10,USD,RELEASED,,2026-03-15T12:00:00Z"));
}

#[test]
fn test_extreme_decimal_precision() {
    run(&[
        ["pay", "2026-03-01T12:00:00Z", "inv-1", "alice", "bob", "0.0001", "USD", ""],
        ["pay", "2026-03-01T12:00:00Z", "inv-2", "alice", "bob", "1000000000.0000", "USD", ""],
    ])
    .success()
    .stdout(predicate::str::contains("inv-1,0.0001,USD,HELD"))
    .stdout(predicate::str::contains("inv-2,1000000000,USD,HELD"));
}
