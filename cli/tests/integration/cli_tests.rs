//! Argument parsing, help, and version output.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn idve() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("idve"));
    cmd.env("NO_COLOR", "1").env_remove("IDVE_CONFIG");
    cmd
}

#[test]
fn test_cli_no_args_shows_help_and_exits_two() {
    idve().assert().code(2).stderr(predicate::str::contains(
        "Single-host QEMU instance lifecycle orchestrator",
    ));
}

#[test]
fn test_cli_help_lists_lifecycle_commands() {
    let assert = idve().arg("--help").assert().success();
    let out = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for cmd in [
        "create", "update", "start", "stop", "status", "list", "delete", "resize", "console",
        "address", "command", "templates", "config", "version",
    ] {
        assert!(out.contains(cmd), "help should list `{cmd}`:\n{out}");
    }
}

#[test]
fn test_cli_version_flag_shows_version() {
    idve()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("idve"));
}

#[test]
fn test_version_command_shows_version() {
    idve()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(concat!("idve ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_version_command_json_outputs_valid_json() {
    let assert = idve().args(["version", "--json"]).assert().success();
    let v: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid JSON");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_unknown_command_fails() {
    idve().arg("reboot").assert().code(2);
}

#[test]
fn test_start_requires_an_id() {
    idve()
        .arg("start")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("<ID>"));
}

#[test]
fn test_resize_rejects_non_numeric_size() {
    idve().args(["resize", "demo1", "big"]).assert().code(2);
}

#[test]
fn test_cli_accepts_conventional_no_color_values() {
    for value in ["1", "true", "yes", ""] {
        Command::new(assert_cmd::cargo::cargo_bin!("idve"))
            .env("NO_COLOR", value)
            .env_remove("IDVE_CONFIG")
            .arg("version")
            .assert()
            .success()
            .stdout(predicate::str::contains("idve"));
    }
}
