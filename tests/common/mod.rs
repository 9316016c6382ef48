//! Common test utilities for worktrail integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.local/share/worktrail/` or `~/.config/worktrail/`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with isolated data and config directories.
///
/// The `wt()` method returns a `Command` that sets `WT_DATA_DIR`,
/// `WT_CONFIG_DIR` and `WT_USER` per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub root: TempDir,
    pub work_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with a plain (non-git) working directory.
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        // The binary sees the canonical cwd; keep stored paths comparable
        let base = root.path().canonicalize().unwrap();
        let work_dir = base.join("api");
        std::fs::create_dir_all(&work_dir).unwrap();
        Self {
            work_dir,
            data_dir: base.join("data"),
            config_dir: base.join("config"),
            root,
        }
    }

    /// Get a Command for the wt binary, run from the working directory.
    pub fn wt(&self) -> Command {
        self.wt_in(&self.work_dir)
    }

    /// Get a Command for the wt binary, run from `dir`.
    pub fn wt_in(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_wt"));
        cmd.current_dir(dir);
        cmd.env("WT_DATA_DIR", &self.data_dir);
        cmd.env("WT_CONFIG_DIR", &self.config_dir);
        cmd.env("WT_USER", "alice");
        for var in ["WT_AGENT_SESSION_ID", "CLAUDE_SESSION_ID", "WT_GIT_TIMEOUT", "WT_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Run a command expected to succeed and parse its JSON output.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.wt().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "wt {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    /// Canonical path of the temp root.
    pub fn base(&self) -> PathBuf {
        self.work_dir.parent().unwrap().to_path_buf()
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Turn `dir` into a clone of a fresh bare `origin` with one commit on `main`.
///
/// Returns the path of the bare repository.
pub fn init_repo_with_origin(dir: &Path) -> PathBuf {
    let parent = dir.parent().unwrap();
    let name = dir.file_name().unwrap().to_string_lossy().to_string();
    let origin = parent.join(format!("{}-origin.git", name));

    git(parent, &["init", "--bare", origin.to_str().unwrap()]);
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["remote", "add", "origin", origin.to_str().unwrap()]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", "Initial commit"]);
    git(dir, &["branch", "-M", "main"]);
    git(dir, &["push", "-u", "origin", "main"]);
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    origin
}

/// True if the bare repository at `origin` has `branch`.
pub fn remote_has_branch(origin: &Path, branch: &str) -> bool {
    StdCommand::new("git")
        .args(["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
        .current_dir(origin)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
