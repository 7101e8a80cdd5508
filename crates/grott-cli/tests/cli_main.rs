//! CLI tests for the grott command-line host.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Grott bridge"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("probe"))
        .stdout(predicate::str::contains("reset-today"))
        .stdout(predicate::str::contains("mappings"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("grott"));
}

#[test]
fn test_mappings_lists_table() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.arg("mappings");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("measure_power"))
        .stdout(predicate::str::contains("pvpowerout"))
        .stdout(predicate::str::contains("meter_power.today"));
}

/// Test that a broker command without a host fails before connecting.
#[test]
fn test_missing_host_fails() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.env_remove("RUST_LOG").arg("probe");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("host"));
}

#[test]
fn test_explicit_config_must_exist() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.args(["--config", "/nonexistent/grott.toml", "probe"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_invalid_port_in_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[mqtt]\nhost = \"broker\"\nport = \"abc\"").unwrap();

    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.arg("--config").arg(file.path()).arg("probe");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid [mqtt] settings"));
}

#[test]
fn test_invalid_protocol_flag_fails() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.args(["probe", "--host", "broker", "--protocol", "carrier-pigeon"]);

    cmd.assert().failure();
}

/// Probing an unreachable broker reports the failure as a pairing result.
#[test]
fn test_probe_unreachable_broker() {
    let mut cmd = Command::cargo_bin("grott").unwrap();
    cmd.args(["probe", "--host", "127.0.0.1", "--port", "1"])
        .timeout(std::time::Duration::from_secs(30));

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("\"success\": false"));
}
