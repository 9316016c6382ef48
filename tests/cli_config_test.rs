//! Integration tests for `wt config` and configuration precedence.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_show_defaults_with_sources() {
    let env = TestEnv::new();

    let shown = env.json(&["config", "show"]);
    assert_eq!(shown["exists"], false);
    let values = shown["values"].as_array().unwrap();
    let user = values.iter().find(|v| v["key"] == "user").unwrap();
    assert_eq!(user["value"], "alice");
    assert_eq!(user["source"], "env:WT_USER");
    let timeout = values.iter().find(|v| v["key"] == "git-timeout").unwrap();
    assert_eq!(timeout["value"], "60");
    assert_eq!(timeout["source"], "default");
}

#[test]
fn test_set_writes_kdl() {
    let env = TestEnv::new();

    env.wt()
        .args(["config", "set", "git-timeout", "15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"key\":\"git-timeout\""));

    let content = std::fs::read_to_string(env.config_dir.join("config.kdl")).unwrap();
    assert!(content.contains("git-timeout"));
    assert!(content.contains("15"));

    let shown = env.json(&["config", "show"]);
    let timeout = shown["values"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["key"] == "git-timeout")
        .unwrap()
        .clone();
    assert_eq!(timeout["value"], "15");
    assert_eq!(timeout["source"], "config");
}

#[test]
fn test_set_rejects_bad_value() {
    let env = TestEnv::new();
    env.wt()
        .args(["config", "set", "git-timeout", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive number of seconds"));
}

#[test]
fn test_output_format_from_config() {
    let env = TestEnv::new();
    env.wt()
        .args(["config", "set", "output-format", "human"])
        .assert()
        .success();

    env.wt()
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions."));
}

#[test]
fn test_workspace_assigned_from_path() {
    let env = TestEnv::new();
    env.wt()
        .args(["config", "set", "workspace.primary"])
        .arg(env.base())
        .assert()
        .success();

    env.wt()
        .args(["session", "new", "login"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"workspace\":\"primary\""));

    let list = env.json(&["session", "list", "-w", "primary"]);
    assert_eq!(list["count"], 1);
    let other = env.json(&["session", "list", "-w", "oss"]);
    assert_eq!(other["count"], 0);
}

#[test]
fn test_data_dir_flag_overrides_env() {
    let env = TestEnv::new();
    let elsewhere = env.base().join("elsewhere");

    env.wt()
        .args(["session", "new", "login", "--data-dir"])
        .arg(&elsewhere)
        .assert()
        .success();

    assert!(elsewhere.join("sessions.json").exists());
    assert!(!env.index_path().exists());
}
