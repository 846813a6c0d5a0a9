#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

use common::installed_binary;

/// `herobox` in forced dry-run mode against a private state file, with every binary
/// pointed into `dir` so nothing on the host leaks in.
fn herobox(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("herobox"));
    cmd.env_remove("RUST_LOG")
        .env_remove("MOSDNS_PLUGIN_BASE")
        .args(["--dry-run", "--log-level", "warn"])
        .arg("--state-file")
        .arg(dir.join("state.yaml"))
        .arg("--mosdns-config")
        .arg(dir.join("config.yaml"))
        .arg("--mosdns-bin")
        .arg(dir.join("mosdns"))
        .arg("--sing-box-bin")
        .arg(dir.join("sing-box"))
        .arg("--mihomo-bin")
        .arg(dir.join("mihomo"));
    cmd
}

fn parse_snapshots(stdout: &[u8]) -> Vec<Value> {
    serde_json::from_slice(stdout).expect("stdout should be a JSON array of snapshots")
}

#[test]
fn status_lists_every_service() {
    let temp = tempdir().expect("failed to create tempdir");
    installed_binary(temp.path(), "sing-box");

    let output = herobox(temp.path())
        .arg("status")
        .output()
        .expect("failed to run herobox status");
    assert!(output.status.success());

    let snapshots = parse_snapshots(&output.stdout);
    let names: Vec<_> = snapshots
        .iter()
        .map(|snapshot| snapshot["name"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(names, ["mosdns", "sing-box", "mihomo"]);

    // sing-box is installed under the temp dir and dry-run has no cached state for it.
    // mosdns and mihomo also search the host default paths, so their status is not asserted.
    assert_eq!(snapshots[1]["status"], "unknown");

    let state = fs::read_to_string(temp.path().join("state.yaml")).expect("state file written");
    assert!(state.contains("config.yaml"));
}

#[test]
fn start_prints_the_recorded_snapshot() {
    let temp = tempdir().expect("failed to create tempdir");
    installed_binary(temp.path(), "mihomo");

    let output = herobox(temp.path())
        .args(["start", "mihomo"])
        .output()
        .expect("failed to run herobox start");
    assert!(output.status.success());

    let snapshots = parse_snapshots(&output.stdout);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["name"], "mihomo");
    assert_eq!(snapshots[0]["unit"], "mihomo.service");
    assert_eq!(snapshots[0]["status"], "running");
}

#[test]
fn missing_binary_is_reported_for_status() {
    // The default install path is always a candidate; a host copy makes mosdns installed.
    if Path::new(herobox::constants::DEFAULT_MOSDNS_BIN).exists() {
        eprintln!("skipping: {} exists on this host", herobox::constants::DEFAULT_MOSDNS_BIN);
        return;
    }
    let temp = tempdir().expect("failed to create tempdir");

    herobox(temp.path())
        .args(["status", "mosdns"])
        .env("MOSDNS_STATUS_HOST", "127.0.0.1")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"mosdns\""))
        .stdout(predicate::str::contains("\"status\": \"missing\""));
}

#[test]
fn unknown_service_fails() {
    let temp = tempdir().expect("failed to create tempdir");

    herobox(temp.path())
        .args(["stop", "nginx"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("nginx"));
}

#[test]
fn invalid_log_level_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("herobox"))
        .arg("--state-file")
        .arg(temp.path().join("state.yaml"))
        .args(["--log-level", "loud", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level"));
}
