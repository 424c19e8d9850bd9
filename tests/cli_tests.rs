use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs the binary inside `dir` so no stray config file is picked up.
fn testpub(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("testpub").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("parse"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created testpub.toml"));
    assert!(dir.path().join("testpub.toml").exists());

    testpub(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Batch size: 1000"));

    // A second init must not clobber the file
    testpub(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("testpub.toml"), "[publish]\nbatch_size = 0\n").unwrap();

    testpub(&dir)
        .arg("validate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_validate_missing_file() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .arg("validate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_parse_text_lists_failures() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .arg("parse")
        .arg(fixture("mixed.trx"))
        .assert()
        .success()
        .stdout(predicate::str::contains("VSTest_TestResults_0"))
        .stdout(predicate::str::contains("Calc.Tests.Arithmetic.Divides"))
        .stdout(predicate::str::contains("division by zero"))
        .stdout(predicate::str::contains("Calc.Tests.Arithmetic.Adds").not());
}

#[test]
fn test_parse_json() {
    let dir = TempDir::new().unwrap();
    let output = testpub(&dir)
        .args(["parse", "--format", "json", "--run-name", "Nightly"])
        .arg(fixture("mixed.trx"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let runs: Value = serde_json::from_slice(&output.stdout).unwrap();
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["name"], "Nightly");
    assert_eq!(runs[0]["results"].as_array().unwrap().len(), 2);
}

#[test]
fn test_publish_records_calls() {
    let dir = TempDir::new().unwrap();
    let calls_path = dir.path().join("calls.json");

    testpub(&dir)
        .args(["publish", "--batch-size", "1", "--output"])
        .arg(&calls_path)
        .arg(fixture("mixed.trx"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish Results:"))
        .stdout(predicate::str::contains("Some published tests failed."));

    let calls: Value = serde_json::from_str(&std::fs::read_to_string(&calls_path).unwrap()).unwrap();
    let kinds: Vec<&str> = calls
        .as_array()
        .unwrap()
        .iter()
        .map(|call| call["call"].as_str().unwrap())
        .collect();
    assert_eq!(kinds[0], "createRun");
    assert_eq!(kinds.iter().filter(|k| **k == "addResults").count(), 2);
    assert!(kinds.contains(&"updateRun"));
    // The source document is uploaded as a run attachment
    assert_eq!(kinds.last(), Some(&"runAttachment"));
}

#[test]
fn test_publish_fails_job_on_failed_tests() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .args(["publish", "--fail-on-failed-tests"])
        .arg(fixture("mixed.trx"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("There are one or more test failures."));

    testpub(&dir)
        .args(["publish", "--fail-on-failed-tests"])
        .arg(fixture("passing.trx"))
        .assert()
        .success()
        .stdout(predicate::str::contains("All published tests passed."));
}

#[test]
fn test_publish_unmerged_runs() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .args(["publish", "--no-merge"])
        .arg(fixture("mixed.trx"))
        .arg(fixture("passing.trx"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Runs:     2"))
        .stdout(predicate::str::contains("Total:    3"));
}

#[test]
fn test_publish_missing_file() {
    let dir = TempDir::new().unwrap();
    testpub(&dir)
        .arg("publish")
        .arg(dir.path().join("missing.trx"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("could be read"));
}
