//! Basic CLI tests for the edgebridge command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn edgebridge() -> Command {
    let mut cmd = Command::cargo_bin("edgebridge").unwrap();
    cmd.env_remove("EDGEBRIDGE_RELAY_ID")
        .env_remove("EDGEBRIDGE_CLOUD_API_KEY")
        .env_remove("EDGEBRIDGE_LOG_JSON")
        .env("RUST_LOG", "off");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    edgebridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mappings"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn test_cli_version() {
    edgebridge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("edgebridge"));
}

#[test]
fn test_no_subcommand_shows_error() {
    // Clap's error code for a missing required subcommand
    edgebridge().assert().failure().code(2);
}

#[test]
fn test_mappings_lists_builtin_table() {
    edgebridge()
        .arg("mappings")
        .assert()
        .success()
        .stdout(predicate::str::contains("Facades/Dimmable"))
        .stdout(predicate::str::contains("brightness"));
}

#[test]
fn test_mappings_json() {
    let output = edgebridge().args(["mappings", "--json"]).output().unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let dimmable = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["capability"] == "Facades/Dimmable")
        .unwrap();
    assert_eq!(dimmable["state"], "brightness");
    assert_eq!(dimmable["paths"], 1);
}

#[test]
fn test_resolve_shows_binding() {
    edgebridge()
        .args(["resolve", "lamp-1", "Facades/Switchable", "Facades/Dimmable"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gw-OVERRIDE_ME-lamp-1"))
        .stdout(predicate::str::contains("/3311/0/5850"))
        .stdout(predicate::str::contains("/3311/0/5851"))
        .stdout(predicate::str::contains("GET,PUT"));
}

#[test]
fn test_resolve_uses_config_relay_id() {
    let config = config_file("relay_id = \"relay-9\"\n");
    let output = edgebridge()
        .arg("--config")
        .arg(config.path())
        .args(["resolve", "lamp-1", "Facades/Dimmable", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let binding: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(binding["edge_alias"], "gw-relay-9-lamp-1");
    assert_eq!(binding["resources"][0]["path"], "/3311/0/5851");
}

#[test]
fn test_resolve_unknown_capability() {
    edgebridge()
        .args(["resolve", "odd", "Facades/Unknown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to bridge"));
}

#[test]
fn test_check_config_ok() {
    let config = config_file(
        "relay_id = \"relay-1\"\nwhite_list_by_id = [\"a\", \"b\"]\nreconcile_interval_secs = 10\n",
    );
    edgebridge()
        .arg("check-config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("gw-relay-1-device-id"))
        .stdout(predicate::str::contains("whitelisted:  2"));
}

#[test]
fn test_check_config_rejects_invalid_values() {
    let config = config_file("relay_id = \"r\"\nreconcile_interval_secs = 0\n");
    edgebridge()
        .arg("check-config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("reconcile_interval_secs"));
}

#[test]
fn test_check_config_rejects_bad_template() {
    let config = config_file("relay_id = \"r\"\nendpoint_template = \"gw-{{RELAY_ID}}\"\n");
    edgebridge()
        .arg("check-config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("endpoint_template"));
}

#[test]
fn test_check_config_missing_file() {
    edgebridge()
        .args(["check-config", "/nonexistent/edgebridge.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[cfg(feature = "simulator")]
#[test]
fn test_simulate_prints_device_map() {
    let output = edgebridge().args(["simulate", "--lamps", "1"]).output().unwrap();
    assert!(output.status.success());
    let map: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(map["lamp-1"]["edge_alias"], "gw-simulated-lamp-1");
    assert_eq!(map["thermo-1"]["edge_endpoint_name"], "gw-simulated-thermo-1");
}

#[cfg(not(feature = "simulator"))]
#[test]
fn test_simulate_needs_simulator_feature() {
    edgebridge()
        .arg("simulate")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
