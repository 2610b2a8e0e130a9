//! Integration tests for `runflow run` against the mock backend.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const MOCK_TEXT: &str = "token-0 token-1 token-2 token-3 token-4 This is the final content.";

#[test]
fn test_run_streams_mock_tokens_to_stdout() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains(MOCK_TEXT))
        .stderr(predicate::str::contains("completed"));
}

#[test]
fn test_run_persists_completed_record() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello", "--model", "custom-model"])
        .assert()
        .success();

    let runs_dir = temp_dir.path().join("runs");
    let entries: Vec<_> = fs::read_dir(&runs_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&entries[0]).unwrap()).unwrap();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["model"], "custom-model");
    assert_eq!(record["transcript"], MOCK_TEXT);
    assert_eq!(record["final_content"], "This is the final content.");
    assert!(record["finished_at"].is_string());
}

#[test]
fn test_run_no_store_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello", "--no-store"])
        .assert()
        .success()
        .stdout(predicate::str::contains(MOCK_TEXT));

    assert!(!temp_dir.path().join("runs").exists());
}

#[test]
fn test_run_json_emits_one_frame_per_line() {
    let temp_dir = TempDir::new().unwrap();

    let assert = cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello", "--json"])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let frames: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0]["type"], "token");
    assert_eq!(frames[0]["chunk_index"], 0);
    assert_eq!(frames[0]["is_final"], false);
    assert_eq!(frames[4]["chunk_index"], 4);
    assert_eq!(frames[5]["type"], "final");
    assert_eq!(frames[5]["data"], "This is the final content.");
    assert_eq!(frames[5]["is_final"], true);
}

#[test]
fn test_run_reads_prompt_from_piped_stdin() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .arg("run")
        .write_stdin("piped prompt\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(MOCK_TEXT));
}

#[test]
fn test_run_without_prompt_or_stdin_fails() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No input provided via pipe"));
}

#[test]
fn test_run_rejects_out_of_range_temperature() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello", "--temperature", "9.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("temperature"));
}

#[test]
fn test_run_rejects_unknown_backend() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args(["run", "--prompt", "hello", "--backend", "carrier-pigeon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend"))
        .stderr(predicate::str::contains("mock, process"));
}
