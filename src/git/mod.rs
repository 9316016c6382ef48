//! Git repository adapter.
//!
//! The sync engine never shells out itself; it talks to a [`GitRepo`]. The
//! production implementation, [`GitCli`], runs the `git` binary once per call
//! with a bounded timeout and performs no retries.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;
use wait_timeout::ChildExt;

/// Default time budget for a single git invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote that fetch, pull and push talk to.
pub const ORIGIN: &str = "origin";

/// Errors raised by the git adapter.
///
/// `Timeout` and `Unavailable` are kept apart from `Failed` because the
/// remedy differs: retry later, install git, or fix the repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitError {
    #[error("git {operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("git is unavailable: {0}")]
    Unavailable(String),

    #[error("git {operation} failed: {stderr}")]
    Failed { operation: String, stderr: String },
}

impl GitError {
    fn failed(operation: &str, stderr: impl Into<String>) -> Self {
        GitError::Failed {
            operation: operation.to_string(),
            stderr: stderr.into(),
        }
    }

    /// True for a timeout or a missing git binary, as opposed to git
    /// running and reporting an error.
    pub fn is_tooling(&self) -> bool {
        !matches!(self, GitError::Failed { .. })
    }

    /// Failure text without the operation prefix.
    pub fn reason(&self) -> String {
        match self {
            GitError::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

pub type GitResult<T> = std::result::Result<T, GitError>;

/// Counts from `git status --porcelain`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub staged: usize,
    pub modified: usize,
    pub untracked: usize,
    pub conflicted: usize,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        self.staged + self.modified + self.untracked + self.conflicted == 0
    }

    /// Parse porcelain v1 output.
    pub fn parse(porcelain: &str) -> Self {
        let mut summary = Self::default();
        for line in porcelain.lines() {
            let bytes = line.as_bytes();
            if bytes.len() < 2 {
                continue;
            }
            let (x, y) = (bytes[0], bytes[1]);
            if x == b'?' && y == b'?' {
                summary.untracked += 1;
            } else if x == b'U' || y == b'U' || (x == b'A' && y == b'A') || (x == b'D' && y == b'D')
            {
                summary.conflicted += 1;
            } else {
                if x != b' ' {
                    summary.staged += 1;
                }
                if y != b' ' {
                    summary.modified += 1;
                }
            }
        }
        summary
    }
}

impl std::fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "clean");
        }
        write!(
            f,
            "{} staged, {} modified, {} untracked",
            self.staged, self.modified, self.untracked
        )?;
        if self.conflicted > 0 {
            write!(f, ", {} conflicted", self.conflicted)?;
        }
        Ok(())
    }
}

/// Primitives the sync engine needs from a working copy.
///
/// Every call is blocking and names the repository explicitly, so one adapter
/// serves all repositories of a session.
pub trait GitRepo {
    fn is_repository(&self, path: &Path) -> GitResult<bool>;

    /// Current branch, `None` when HEAD is detached.
    fn current_branch(&self, path: &Path) -> GitResult<Option<String>>;

    fn checkout(&self, path: &Path, branch: &str) -> GitResult<()>;

    fn fetch_origin(&self, path: &Path) -> GitResult<()>;

    /// Whether `origin/<branch>` is known locally (as of the last fetch).
    fn is_branch_on_remote(&self, path: &Path, branch: &str) -> GitResult<bool>;

    fn pull_current_branch(&self, path: &Path) -> GitResult<()>;

    fn has_merge_conflicts(&self, path: &Path) -> GitResult<bool>;

    fn conflicted_files(&self, path: &Path) -> GitResult<Vec<String>>;

    fn has_uncommitted_changes(&self, path: &Path) -> GitResult<bool>;

    fn status_summary(&self, path: &Path) -> GitResult<StatusSummary>;

    /// Stage everything (including untracked files) and commit.
    fn commit_all(&self, path: &Path, message: &str) -> GitResult<()>;

    /// Push `branch` to origin, creating the upstream when `set_upstream`.
    fn push(&self, path: &Path, branch: &str, set_upstream: bool) -> GitResult<()>;

    /// URL of the remote `branch` tracks (origin when no upstream is set).
    fn remote_url(&self, path: &Path, branch: &str) -> GitResult<Option<String>>;

    /// Local commits on `branch` not yet on `origin/<branch>`.
    fn commits_ahead_of_remote(&self, path: &Path, branch: &str) -> GitResult<usize>;
}

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// [`GitRepo`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
        }
    }

    /// Use a different git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, path: &Path, operation: &str, args: &[&str]) -> GitResult<GitOutput> {
        if !path.is_dir() {
            return Err(GitError::failed(
                operation,
                format!("{} is not a directory", path.display()),
            ));
        }

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                GitError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Drain both pipes concurrently so a chatty command cannot block on a
        // full pipe while we wait on it.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || drain(stdout));
        let stderr_reader = thread::spawn(move || drain(stderr));

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                debug!(operation, path = %path.display(), "git call timed out");
                return Err(GitError::Timeout {
                    operation: operation.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
            Err(e) => {
                let _ = child.kill();
                return Err(GitError::failed(operation, e.to_string()));
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        debug!(
            operation,
            path = %path.display(),
            success = status.success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "git call"
        );

        Ok(GitOutput {
            success: status.success(),
            stdout,
            stderr: stderr.trim().to_string(),
        })
    }

    /// Run and require a zero exit status.
    fn run_ok(&self, path: &Path, operation: &str, args: &[&str]) -> GitResult<String> {
        let output = self.run(path, operation, args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            let stderr = if output.stderr.is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr
            };
            Err(GitError::failed(operation, stderr))
        }
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

impl GitRepo for GitCli {
    fn is_repository(&self, path: &Path) -> GitResult<bool> {
        if !path.is_dir() {
            return Ok(false);
        }
        let output = self.run(path, "rev-parse", &["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.success && output.stdout.trim() == "true")
    }

    fn current_branch(&self, path: &Path) -> GitResult<Option<String>> {
        let output = self.run(path, "symbolic-ref", &["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.success {
            return Ok(None);
        }
        let branch = output.stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    fn checkout(&self, path: &Path, branch: &str) -> GitResult<()> {
        let local = self.run(
            path,
            "rev-parse",
            &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)],
        )?;
        if local.success {
            self.run_ok(path, "checkout", &["checkout", branch])?;
        } else if self.is_branch_on_remote(path, branch)? {
            self.run_ok(
                path,
                "checkout",
                &["checkout", "-b", branch, "--track", &format!("{}/{}", ORIGIN, branch)],
            )?;
        } else {
            self.run_ok(path, "checkout", &["checkout", "-b", branch])?;
        }
        Ok(())
    }

    fn fetch_origin(&self, path: &Path) -> GitResult<()> {
        self.run_ok(path, "fetch", &["fetch", ORIGIN])?;
        Ok(())
    }

    fn is_branch_on_remote(&self, path: &Path, branch: &str) -> GitResult<bool> {
        let output = self.run(
            path,
            "rev-parse",
            &[
                "rev-parse",
                "--verify",
                "--quiet",
                &format!("refs/remotes/{}/{}", ORIGIN, branch),
            ],
        )?;
        Ok(output.success)
    }

    fn pull_current_branch(&self, path: &Path) -> GitResult<()> {
        let branch = self
            .current_branch(path)?
            .ok_or_else(|| GitError::failed("pull", "HEAD is detached"))?;
        self.run_ok(
            path,
            "pull",
            &["pull", "--no-rebase", "--no-edit", ORIGIN, &branch],
        )?;
        Ok(())
    }

    fn has_merge_conflicts(&self, path: &Path) -> GitResult<bool> {
        Ok(!self.conflicted_files(path)?.is_empty())
    }

    fn conflicted_files(&self, path: &Path) -> GitResult<Vec<String>> {
        let stdout = self.run_ok(
            path,
            "diff",
            &["diff", "--name-only", "--diff-filter=U"],
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn has_uncommitted_changes(&self, path: &Path) -> GitResult<bool> {
        let stdout = self.run_ok(path, "status", &["status", "--porcelain"])?;
        Ok(!stdout.trim().is_empty())
    }

    fn status_summary(&self, path: &Path) -> GitResult<StatusSummary> {
        let stdout = self.run_ok(path, "status", &["status", "--porcelain"])?;
        Ok(StatusSummary::parse(&stdout))
    }

    fn commit_all(&self, path: &Path, message: &str) -> GitResult<()> {
        self.run_ok(path, "add", &["add", "-A"])?;
        self.run_ok(path, "commit", &["commit", "-m", message])?;
        Ok(())
    }

    fn push(&self, path: &Path, branch: &str, set_upstream: bool) -> GitResult<()> {
        if set_upstream {
            self.run_ok(path, "push", &["push", "-u", ORIGIN, branch])?;
        } else {
            self.run_ok(path, "push", &["push", ORIGIN, branch])?;
        }
        Ok(())
    }

    fn remote_url(&self, path: &Path, branch: &str) -> GitResult<Option<String>> {
        let configured = self.run(
            path,
            "config",
            &["config", "--get", &format!("branch.{}.remote", branch)],
        )?;
        let remote = if configured.success && !configured.stdout.trim().is_empty() {
            configured.stdout.trim().to_string()
        } else {
            ORIGIN.to_string()
        };

        let output = self.run(path, "remote", &["remote", "get-url", &remote])?;
        if !output.success {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    fn commits_ahead_of_remote(&self, path: &Path, branch: &str) -> GitResult<usize> {
        let range = format!("{}/{}..{}", ORIGIN, branch, branch);
        let stdout = self.run_ok(path, "rev-list", &["rev-list", "--count", &range])?;
        stdout
            .trim()
            .parse()
            .map_err(|e| GitError::failed("rev-list", format!("unexpected output: {}", e)))
    }
}
