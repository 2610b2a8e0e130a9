//! Integration tests for `runflow check-auth`.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_check_auth_mock_is_ok() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .arg("check-auth")
        .assert()
        .success()
        .stdout(predicate::str::contains("Authentication OK."));
}

#[test]
fn test_check_auth_process_probe_passes() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args([
            "check-auth",
            "--backend",
            "process",
            "--program",
            "sh",
            "--auth-probe",
            "true",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Authentication OK."));
}

#[test]
fn test_check_auth_process_probe_failure() {
    let temp_dir = TempDir::new().unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .args([
            "check-auth",
            "--backend",
            "process",
            "--program",
            "sh",
            "--auth-probe",
            "false",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"));
}

#[test]
fn test_check_auth_reads_backend_from_config() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("config.toml"),
        r#"
backend = "process"

[process]
program = "sh"
auth_probe = ["false"]
"#,
    )
    .unwrap();

    cargo_bin_cmd!("runflow")
        .env("RUNFLOW_HOME", temp_dir.path())
        .arg("check-auth")
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"));
}
