//! Integration tests for the payment replay CLI.
//!
//! These tests run the actual binary against temporary CSV inputs and
//! verify the report written to stdout.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Write replay rows to a temporary input file.
fn input_file(csv: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(csv.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Run the binary with the given input and return stdout.
fn run_replay(csv: &str) -> String {
    let file = input_file(csv);
    let mut cmd = Command::cargo_bin("payrail").unwrap();
    let assert = cmd.arg(file.path()).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).unwrap()
}

#[test]
fn test_fund_and_pay_report() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,alice,,,\n\
         register,bob,,,\n\
         fund,alice,,10000,\n\
         pay,alice,bob,2500,\n",
    );

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "account,balance,hold,total_in,total_out");
    assert_eq!(lines[1], "alice,7500,0,10000,2500");
    assert_eq!(lines[2], "bob,2500,0,2500,0");
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_escrow_rows_settle_through_the_report() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,alice,,,\n\
         register,bob,,,\n\
         fund,alice,,10000,\n\
         escrow_create,alice,bob,3000,deal-1\n\
         escrow_create,alice,bob,2000,deal-2\n\
         escrow_release,,,,deal-1\n",
    );

    let lines: Vec<&str> = output.lines().collect();
    // deal-1 released to bob, deal-2 still held.
    assert_eq!(lines[1], "alice,5000,2000,10000,3000");
    assert_eq!(lines[2], "bob,3000,0,3000,0");
}

#[test]
fn test_duplicate_ref_rows_apply_once() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,alice,,,\n\
         register,bob,,,\n\
         fund,alice,,1000,\n\
         pay,alice,bob,400,order-1\n\
         pay,alice,bob,400,order-1\n\
         pay,alice,bob,400,order-1\n",
    );

    assert!(output.contains("alice,600,0,1000,400"));
    assert!(output.contains("bob,400,0,400,0"));
}

#[test]
fn test_policy_rows_guard_payments() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,alice,,,\n\
         register,bob,,,\n\
         fund,alice,,10000,\n\
         limit,alice,,500,\n\
         pay,alice,bob,600,\n\
         pay,alice,bob,500,\n\
         pause,alice,,,\n\
         pay,alice,bob,100,\n",
    );

    // Only the in-limit, pre-pause payment lands.
    assert!(output.contains("alice,9500,0,10000,500"));
    assert!(output.contains("bob,500,0,500,0"));
}

#[test]
fn test_malformed_rows_are_skipped() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,alice,,,\n\
         register,bob,,,\n\
         fund,alice,,oops,\n\
         teleport,alice,bob,1,\n\
         fund,alice,,1000,\n\
         pay,alice,bob,250,\n",
    );

    assert!(output.contains("alice,750,0,1000,250"));
    assert!(output.contains("bob,250,0,250,0"));
}

#[test]
fn test_report_sorted_by_account_id() {
    let output = run_replay(
        "op,account,counterparty,amount,ref\n\
         register,zeta,,,\n\
         register,alpha,,,\n\
         register,mike,,,\n",
    );

    let lines: Vec<&str> = output.lines().collect();
    assert!(lines[1].starts_with("alpha,"));
    assert!(lines[2].starts_with("mike,"));
    assert!(lines[3].starts_with("zeta,"));
}

#[test]
fn test_missing_file_error() {
    let mut cmd = Command::cargo_bin("payrail").unwrap();
    cmd.arg("nonexistent.csv")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error").or(predicate::str::contains("Error")));
}

#[test]
fn test_missing_argument_error() {
    let mut cmd = Command::cargo_bin("payrail").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Missing input file"));
}
