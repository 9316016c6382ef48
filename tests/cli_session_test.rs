//! Integration tests for session and conversation commands via CLI.
//!
//! These tests verify that:
//! - `wt session new/list/show/rename/delete` work end to end
//! - Issue keys resolve wherever a session name is accepted
//! - Commands without an explicit session find the one the caller is in
//! - Errors are printed as JSON (or `Error:` with -H) with exit code 1

mod common;

use common::TestEnv;
use predicates::prelude::*;

// === Create / Show ===

#[test]
fn test_new_session_json() {
    let env = TestEnv::new();

    env.wt()
        .args(["session", "new", "login", "-g", "Fix login"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\":\"login\""))
        .stdout(predicate::str::contains("\"repository\":\"api\""))
        .stdout(predicate::str::contains("\"user\":\"alice\""));

    assert!(env.index_path().exists());
}

#[test]
fn test_new_session_human() {
    let env = TestEnv::new();

    env.wt()
        .args(["session", "new", "login", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created session 'login'"))
        .stdout(predicate::str::contains("Clock running for alice"));
}

#[test]
fn test_duplicate_name_fails_with_json_error() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    env.wt()
        .args(["session", "new", "login"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("{\"error\":"))
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_error_human_readable() {
    let env = TestEnv::new();

    env.wt()
        .args(["session", "show", "missing", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: Session not found: missing"));
}

#[test]
fn test_show_without_id_uses_cwd() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    let nested = env.work_dir.join("src");
    std::fs::create_dir_all(&nested).unwrap();
    env.wt_in(&nested)
        .args(["session", "show", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Session: login"));

    env.wt_in(&env.base())
        .args(["session", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no session for"));
}

#[test]
fn test_show_by_agent_id_from_env() {
    let env = TestEnv::new();
    env.wt()
        .args(["session", "new", "login", "--agent-id", "conv-42"])
        .assert()
        .success();

    env.wt_in(&env.base())
        .env("WT_AGENT_SESSION_ID", "conv-42")
        .args(["conversation", "current"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"session\":\"login\""))
        .stdout(predicate::str::contains("\"matched_by\":\"agent_id\""));
}

// === Issue keys / status ===

#[test]
fn test_link_issue_and_resolve_by_key() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    env.wt()
        .args(["session", "link", "PROJ-123", "-t", "Fix login"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"goal\":\"PROJ-123: Fix login\""));

    env.wt()
        .args(["session", "status", "in_progress", "-s", "PROJ-123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"in_progress\""));

    let shown = env.json(&["session", "show", "PROJ-123"]);
    assert_eq!(shown["session"]["name"], "login");
    assert_eq!(shown["session"]["status"], "in_progress");
}

#[test]
fn test_issue_key_cannot_be_shared() {
    let env = TestEnv::new();
    env.wt()
        .args(["session", "new", "a", "-i", "PROJ-1"])
        .assert()
        .success();
    env.wt().args(["session", "new", "b"]).assert().success();

    env.wt()
        .args(["session", "link", "PROJ-1", "-s", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already linked to session 'a'"));
}

#[test]
fn test_invalid_status_rejected() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    env.wt()
        .args(["session", "status", "paused"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown status"));
}

// === List / rename / delete ===

#[test]
fn test_list_filters_and_counts() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "a"]).assert().success();
    env.wt().args(["session", "new", "b"]).assert().success();
    env.wt()
        .args(["session", "status", "completed", "-s", "a"])
        .assert()
        .success();

    let all = env.json(&["session", "list"]);
    assert_eq!(all["count"], 2);
    // Most recently active first
    assert_eq!(all["sessions"][0]["name"], "a");

    let done = env.json(&["session", "list", "-s", "completed"]);
    assert_eq!(done["count"], 1);
    assert_eq!(done["sessions"][0]["name"], "a");
}

#[test]
fn test_list_empty_human() {
    let env = TestEnv::new();
    env.wt()
        .args(["session", "list", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions."));
}

#[test]
fn test_rename_then_delete() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "old"]).assert().success();

    env.wt()
        .args(["session", "rename", "old", "new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"new_name\":\"new\""));
    env.wt().args(["session", "show", "old"]).assert().failure();

    env.wt().args(["session", "delete", "new"]).assert().success();
    let list = env.json(&["session", "list"]);
    assert_eq!(list["count"], 0);
}

#[test]
fn test_invalid_session_name() {
    let env = TestEnv::new();
    env.wt()
        .args(["session", "new", "a/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid characters"));
}

// === Notes / PRs / conversations ===

#[test]
fn test_notes_and_prs() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    env.wt()
        .args(["session", "note", "Waiting on review"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"note_count\":1"));
    env.wt()
        .args(["session", "pr", "https://git.example/pr/9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"added\":true"));

    let shown = env.json(&["session", "show", "login"]);
    assert_eq!(shown["session"]["notes"][0]["text"], "Waiting on review");
    assert_eq!(
        shown["session"]["conversations"]["api"]["active_session"]["prs"][0],
        "https://git.example/pr/9"
    );
}

#[test]
fn test_conversations_across_repositories() {
    let env = TestEnv::new();
    let web = env.base().join("web");
    std::fs::create_dir_all(&web).unwrap();
    env.wt()
        .args(["session", "new", "login", "--agent-id", "c1"])
        .assert()
        .success();

    env.wt()
        .args(["conversation", "add", "login", "-p"])
        .arg(&web)
        .args(["--agent-id", "c2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"repository\":\"web\""))
        .stdout(predicate::str::contains("\"archived_previous\":false"));

    env.wt()
        .args(["conversation", "add", "login", "--agent-id", "c3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"archived_previous\":true"));

    let list = env.json(&["conversation", "list", "login"]);
    let conversations = list["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0]["repository"], "api");
    assert_eq!(conversations[0]["active"]["ai_agent_session_id"], "c3");
    assert_eq!(conversations[0]["archived"][0]["ai_agent_session_id"], "c1");
    assert_eq!(conversations[1]["repository"], "web");
}

#[test]
fn test_corrupt_index_is_set_aside() {
    let env = TestEnv::new();
    std::fs::create_dir_all(&env.data_dir).unwrap();
    std::fs::write(env.index_path(), "{ not json").unwrap();

    env.wt()
        .args(["session", "new", "login"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning:"));

    assert!(env.data_dir.join("sessions.json.corrupt").exists());
    let list = env.json(&["session", "list"]);
    assert_eq!(list["count"], 1);
}

#[test]
fn test_non_utf8_index_is_set_aside() {
    let env = TestEnv::new();
    std::fs::create_dir_all(&env.data_dir).unwrap();
    std::fs::write(env.index_path(), [0xff, 0xfe, 0x7b]).unwrap();

    env.wt()
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\":0"))
        .stderr(predicate::str::contains("not valid JSON"));
    assert!(env.data_dir.join("sessions.json.corrupt").exists());
}

#[test]
fn test_session_without_conversations_is_rejected() {
    let env = TestEnv::new();
    env.wt().args(["session", "new", "login"]).assert().success();

    let mut index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(env.index_path()).unwrap()).unwrap();
    index["sessions"]["login"]["conversations"] = serde_json::json!({});
    std::fs::write(env.index_path(), index.to_string()).unwrap();

    env.wt()
        .args(["session", "show", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no conversations"));
    env.wt()
        .args(["conversation", "list", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no conversations"));

    // Still listable and removable
    assert_eq!(env.json(&["session", "list"])["count"], 1);
    env.wt().args(["session", "delete", "login"]).assert().success();
}
