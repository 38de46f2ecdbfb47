//! Instance commands that need no hypervisor: queries over hand-written
//! records, dry runs, and input validation.

#![allow(clippy::expect_used)]

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Temporary installation: a config file pointing every path into a
/// scratch directory.
struct Install {
    dir: TempDir,
    config: PathBuf,
}

impl Install {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().display().to_string();
        let config = dir.path().join("config.yaml");
        std::fs::write(
            &config,
            format!(
                "paths:\n  state_dir: {root}/state\n  seed_dir: {root}/seed\n  run_dir: {root}/run\n  \
                 tpm_dir: {root}/tpm\n  nvram_dir: {root}/nvram\n  pools_file: {root}/pools.yaml\n  \
                 templates_file: {root}/templates.yaml\nnetwork:\n  lease_files: []\n"
            ),
        )
        .expect("write config");
        Self { dir, config }
    }

    fn idve(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("idve"));
        cmd.env("NO_COLOR", "1")
            .env_remove("IDVE_CONFIG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    /// Store a stopped instance record as the orchestrator would.
    fn add_record(&self, id: &str) {
        let state = self.dir.path().join("state");
        std::fs::create_dir_all(&state).expect("state dir");
        let disk = self.dir.path().join(format!("{id}.qcow2"));
        let record = serde_json::json!({
            "id": id,
            "name": id,
            "hardware": { "memory_mib": 2048, "cpu_cores": 2 },
            "storage": { "pool": "local", "size_gib": 20, "disk": disk },
            "network": { "nics": [{ "bridge": "br0", "mac": "52:54:00:12:34:56" }] },
            "status": "stopped",
            "created_at": "2026-01-01T00:00:00Z"
        });
        std::fs::write(
            state.join(format!("{id}.json")),
            serde_json::to_vec_pretty(&record).expect("serialize"),
        )
        .expect("write record");
    }

    fn json(&self, args: &[&str]) -> (i32, serde_json::Value) {
        let output = self.idve().args(args).arg("--json").output().expect("run idve");
        let v = serde_json::from_slice(&output.stdout).unwrap_or(serde_json::Value::Null);
        (output.status.code().unwrap_or(-1), v)
    }
}

#[test]
fn test_status_of_empty_installation() {
    let install = Install::new();
    let (code, v) = install.json(&["status"]);
    assert_eq!(code, 0);
    assert_eq!(v, serde_json::json!([]));

    install
        .idve()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No instances"));
}

#[test]
fn test_unknown_instance_is_not_found() {
    let install = Install::new();
    for cmd in ["status", "start", "stop", "console", "command"] {
        let (code, v) = install.json(&[cmd, "ghost"]);
        assert_eq!(code, 1, "{cmd}");
        assert_eq!(v["code"], "not_found", "{cmd}: {v}");
    }
}

#[test]
fn test_delete_unknown_instance_fails_before_prompting() {
    let install = Install::new();
    install
        .idve()
        .args(["delete", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_invalid_id_is_rejected() {
    let install = Install::new();
    let (code, v) = install.json(&["status", "../etc"]);
    assert_eq!(code, 1);
    assert_eq!(v["code"], "invalid");
}

#[test]
fn test_command_prints_launch_line_without_launching() {
    let install = Install::new();
    install.add_record("demo1");
    install
        .idve()
        .args(["command", "demo1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qemu-system-x86_64"))
        .stdout(predicate::str::contains("-name demo1"))
        .stdout(predicate::str::contains("-vnc :1"))
        .stdout(predicate::str::contains("52:54:00:12:34:56"));

    let (code, v) = install.json(&["command", "demo1"]);
    assert_eq!(code, 0);
    assert_eq!(v["program"], "qemu-system-x86_64");
    let args: Vec<&str> = v["args"]
        .as_array()
        .expect("args array")
        .iter()
        .filter_map(|a| a.as_str())
        .collect();
    let m = args.iter().position(|a| *a == "-m").expect("-m present");
    assert_eq!(args[m + 1], "2048");
}

#[test]
fn test_console_of_stopped_instance() {
    let install = Install::new();
    install.add_record("demo1");
    let (code, v) = install.json(&["console", "demo1"]);
    assert_eq!(code, 0);
    assert_eq!(v["display_port"], 5901);
    assert_eq!(v["vnc_display"], 1);
    assert_eq!(v["running"], false);
}

#[test]
fn test_status_reports_observed_state() {
    let install = Install::new();
    install.add_record("demo1");
    let (code, v) = install.json(&["status", "demo1"]);
    assert_eq!(code, 0);
    assert_eq!(v["id"], "demo1");
    assert_eq!(v["status"], "stopped");
}

#[test]
fn test_address_of_stopped_instance_is_unknown() {
    let install = Install::new();
    install.add_record("demo1");
    let (code, v) = install.json(&["address", "demo1"]);
    assert_eq!(code, 2);
    assert_eq!(v["address"], serde_json::Value::Null);
}

#[test]
fn test_templates_lists_builtins() {
    let install = Install::new();
    let (code, v) = install.json(&["templates"]);
    assert_eq!(code, 0);
    let names: Vec<&str> = v
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"ubuntu-24.04"), "{names:?}");
    assert!(names.contains(&"debian-12"), "{names:?}");
}

#[test]
fn test_create_rejects_bad_declaration() {
    let install = Install::new();
    let decl = install.dir.path().join("bad.yaml");
    std::fs::write(&decl, "id: demo1\n").expect("write declaration");
    let output = install
        .idve()
        .args(["create", "--json", "--file"])
        .arg(&decl)
        .output()
        .expect("run idve");
    assert_eq!(output.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["code"], "invalid");
}

#[test]
fn test_create_reads_stdin_and_rejects_unknown_pool() {
    let install = Install::new();
    install
        .idve()
        .args(["create", "--file", "-"])
        .write_stdin("id: demo1\nstorage:\n  pool: ceph\n  size_gib: 20\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ceph"));
}

#[test]
fn test_update_without_changes_is_invalid() {
    let install = Install::new();
    install.add_record("demo1");
    let (code, v) = install.json(&["update", "demo1"]);
    assert_eq!(code, 1);
    assert_eq!(v["code"], "invalid");
}
