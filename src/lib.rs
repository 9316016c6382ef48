//! Worktrail - work session tracking for AI-assisted development.
//!
//! This library provides the core functionality for the `wt` CLI tool:
//! sessions that span several repositories, the AI-agent conversations
//! attached to them, time tracking, and the branch synchronization that
//! export runs before bundling sessions for a teammate.

pub mod bundle;
pub mod cli;
pub mod commands;
pub mod config;
pub mod git;
pub mod models;
pub mod report;
pub mod storage;
pub mod sync;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    /// Run git in `dir`, panicking on failure.
    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
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

    /// A bare `origin` plus a working clone with one commit on `main`.
    pub struct GitFixture {
        pub root: TempDir,
        pub origin: PathBuf,
        pub work: PathBuf,
    }

    impl GitFixture {
        pub fn new() -> Self {
            let root = TempDir::new().unwrap();
            let origin = root.path().join("origin.git");
            let work = root.path().join("work");

            git(root.path(), &["init", "--bare", "origin.git"]);
            git(root.path(), &["clone", "origin.git", "work"]);
            configure_identity(&work);

            std::fs::write(work.join("README.md"), "hello\n").unwrap();
            git(&work, &["add", "-A"]);
            git(&work, &["commit", "-m", "Initial commit"]);
            git(&work, &["branch", "-M", "main"]);
            git(&work, &["push", "-u", "origin", "main"]);
            git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

            Self { root, origin, work }
        }

        /// Clone origin a second time, as a teammate would.
        pub fn clone_teammate(&self) -> PathBuf {
            let path = self.root.path().join("teammate");
            git(self.root.path(), &["clone", "origin.git", "teammate"]);
            configure_identity(&path);
            path
        }

        pub fn write(&self, file: &str, content: &str) {
            std::fs::write(self.work.join(file), content).unwrap();
        }

        pub fn remote_has_branch(&self, branch: &str) -> bool {
            Command::new("git")
                .args(["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
                .current_dir(&self.origin)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        }
    }

    fn configure_identity(dir: &Path) {
        git(dir, &["config", "user.email", "test@test.com"]);
        git(dir, &["config", "user.name", "Test"]);
    }
}

/// Library-level error type for worktrail operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session '{0}' already exists")]
    DuplicateName(String),

    #[error("Issue {key} is already linked to session '{session}'")]
    DuplicateIssueKey { key: String, session: String },

    #[error("Session '{0}' has no conversations")]
    NoConversations(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Failed to lock session index: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Git(#[from] git::GitError),

    #[error("{source}")]
    Sync {
        label: String,
        #[source]
        source: sync::SyncError,
    },

    #[error("Export incomplete, repositories not synchronized: {}", .0.join("; "))]
    PartialExport(Vec<String>),
}

/// Result type alias for worktrail operations.
pub type Result<T> = std::result::Result<T, Error>;
