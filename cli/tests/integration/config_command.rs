//! `idve config` against temporary configuration files.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn idve() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("idve"));
    cmd.env("NO_COLOR", "1").env_remove("IDVE_CONFIG");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, body).expect("write config");
    path
}

#[test]
fn test_config_path_honours_env() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("custom.yaml");
    idve()
        .env("IDVE_CONFIG", &path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(path.display().to_string()));
}

#[test]
fn test_config_flag_overrides_env() {
    let dir = TempDir::new().expect("tempdir");
    let flag = dir.path().join("flag.yaml");
    idve()
        .env("IDVE_CONFIG", dir.path().join("env.yaml"))
        .args(["config", "path", "--config"])
        .arg(&flag)
        .assert()
        .success()
        .stdout(predicate::str::contains("flag.yaml"))
        .stdout(predicate::str::contains("env.yaml").not());
}

#[test]
fn test_config_path_default_location() {
    idve()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/idve/config.yaml"));
}

#[test]
fn test_config_show_json_merges_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "display:\n  keyboard: de\n");
    let assert = idve()
        .args(["config", "show", "--json", "--config"])
        .arg(&path)
        .assert()
        .success();
    let v: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid JSON");
    assert_eq!(v["config"]["display"]["keyboard"], "de");
    assert_eq!(v["config"]["display"]["display_base"], 5900);
}

#[test]
fn test_config_show_human() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "display:\n  keyboard: fr\n");
    idve()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("keyboard: fr"))
        .stdout(predicate::str::contains("IDVE_CONFIG"));
}

#[test]
fn test_invalid_config_is_reported_as_json_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "display:\n  proxy_attempts: 0\n");
    let assert = idve()
        .args(["config", "show", "--json", "--config"])
        .arg(&path)
        .assert()
        .code(1);
    let v: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid JSON");
    assert_eq!(v["error"], true);
    assert_eq!(v["code"], "invalid");
}

#[test]
fn test_unparseable_config_fails_with_message() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "display: [unterminated\n");
    idve()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
