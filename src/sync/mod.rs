//! Branch synchronization engine.
//!
//! Before a session is exported, every repository it touches has to be on the
//! session's branch, fully committed, and published to `origin`. The engine
//! does that one repository at a time as a single pass over [`PLAN`], a table
//! of steps each tagged with a [`StepPolicy`]. The policy, not the step,
//! decides whether a failure stops the repository or is only reported.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::git::{GitError, GitRepo};
use crate::models::Session;
use crate::report::Reporter;

/// One step of the per-repository pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RepositoryCheck,
    Checkout,
    Fetch,
    Pull,
    Commit,
    Push,
    CaptureRemote,
}

/// What a step failure means for the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Any failure stops this repository
    Required,
    /// Merge conflicts and adapter errors stop this repository; other
    /// failures are reported
    FatalOnConflict,
    /// Failures are reported and the pipeline continues on local state,
    /// except a timeout or missing git binary
    BestEffort,
    /// Failures are logged only
    Opportunistic,
}

/// The pipeline, in execution order.
pub const PLAN: &[(Step, StepPolicy)] = &[
    (Step::RepositoryCheck, StepPolicy::Required),
    (Step::Checkout, StepPolicy::Required),
    (Step::Fetch, StepPolicy::BestEffort),
    (Step::Pull, StepPolicy::FatalOnConflict),
    (Step::Commit, StepPolicy::Required),
    (Step::Push, StepPolicy::Required),
    (Step::CaptureRemote, StepPolicy::Opportunistic),
];

/// Which push failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushPhase {
    /// First publication of a branch that was not on the remote
    NewBranch,
    /// Publishing new commits to a branch the remote already had
    Update,
}

/// Why a repository failed to synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Only ever used as a skip reason; see [`SkipReason::NotARepository`].
    #[error("{label} is not a git repository")]
    NotARepository { label: String },

    #[error("Cannot checkout branch '{branch}' in {label}: {}", .source.reason())]
    CheckoutFailed {
        label: String,
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Merge conflicts in {label} on branch '{branch}': {}", .files.join(", "))]
    MergeConflict {
        label: String,
        branch: String,
        files: Vec<String>,
    },

    /// A pull that failed without leaving conflicts behind
    #[error("Failed to pull '{branch}' in {label}: {}", .source.reason())]
    PullFailed {
        label: String,
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Failed to commit changes in {label}: {}. Cannot export without committing", .source.reason())]
    CommitFailed {
        label: String,
        #[source]
        source: GitError,
    },

    #[error("{}", push_failure_message(.phase, .label, .branch, .committed, .source))]
    PushFailed {
        label: String,
        branch: String,
        phase: PushPhase,
        /// A WIP commit was made before the push failed and is still local
        committed: bool,
        #[source]
        source: GitError,
    },

    #[error("Could not read the remote URL of '{branch}' in {label}")]
    RemoteCaptureFailed { label: String, branch: String },

    /// A git call with no step-specific meaning failed, or git timed out
    /// or could not be run
    #[error("{label}: {source}{}", kept_commit_note(.committed))]
    Adapter {
        label: String,
        committed: bool,
        #[source]
        source: GitError,
    },
}

fn push_failure_message(
    phase: &PushPhase,
    label: &str,
    branch: &str,
    committed: &bool,
    source: &GitError,
) -> String {
    let mut message = match phase {
        PushPhase::NewBranch => format!(
            "Failed to push branch '{}' from {}: {}. Teammate needs branch on remote",
            branch,
            label,
            source.reason()
        ),
        PushPhase::Update => format!(
            "Failed to push to remote for '{}' in {}: {}. Teammate may not have latest",
            branch,
            label,
            source.reason()
        ),
    };
    message.push_str(kept_commit_note(committed));
    message
}

fn kept_commit_note(committed: &bool) -> &'static str {
    if *committed {
        " (the WIP commit is kept locally; re-run to publish it)"
    } else {
        ""
    }
}

impl SyncError {
    /// True if the repository holds a local WIP commit that was never pushed.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            SyncError::PushFailed { committed: true, .. } | SyncError::Adapter { committed: true, .. }
        )
    }

    /// True for an adapter error caused by a timeout or missing git binary.
    pub fn is_tooling(&self) -> bool {
        matches!(self, SyncError::Adapter { source, .. } if source.is_tooling())
    }

    pub fn label(&self) -> &str {
        match self {
            SyncError::NotARepository { label }
            | SyncError::CheckoutFailed { label, .. }
            | SyncError::MergeConflict { label, .. }
            | SyncError::PullFailed { label, .. }
            | SyncError::CommitFailed { label, .. }
            | SyncError::PushFailed { label, .. }
            | SyncError::RemoteCaptureFailed { label, .. }
            | SyncError::Adapter { label, .. } => label,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotARepository { .. } => "not_a_repository",
            SyncError::CheckoutFailed { .. } => "checkout_failed",
            SyncError::MergeConflict { .. } => "merge_conflict",
            SyncError::PullFailed { .. } => "pull_failed",
            SyncError::CommitFailed { .. } => "commit_failed",
            SyncError::PushFailed { .. } => "push_failed",
            SyncError::RemoteCaptureFailed { .. } => "remote_capture_failed",
            SyncError::Adapter { .. } => "adapter",
        }
    }
}

/// Input for one repository.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub path: PathBuf,
    /// Target branch; `None` means whatever is checked out
    pub branch: Option<String>,
    /// Human label used in messages (the repository identifier)
    pub label: String,
    pub commit_message: String,
}

/// Why a repository was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotARepository,
    /// No target branch recorded and HEAD is detached
    NoBranch,
    /// The conversation holds no context to take a path from
    NoContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced,
    Skipped(SkipReason),
}

/// Side effects the engine performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    CheckedOut,
    Fetched,
    Pulled,
    Committed,
    PushedNewBranch,
    PushedUpdate,
}

/// Result of a successful (or skipped) repository pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub label: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub outcome: SyncOutcome,
    pub actions: Vec<SyncAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SyncReport {
    fn new(request: &SyncRequest) -> Self {
        Self {
            label: request.label.clone(),
            path: request.path.clone(),
            branch: request.branch.clone(),
            outcome: SyncOutcome::Synced,
            actions: Vec::new(),
            remote_url: None,
            warnings: Vec::new(),
        }
    }

    pub fn skipped(label: &str, path: &Path, reason: SkipReason) -> Self {
        Self {
            label: label.to_string(),
            path: path.to_path_buf(),
            branch: None,
            outcome: SyncOutcome::Skipped(reason),
            actions: Vec::new(),
            remote_url: None,
            warnings: Vec::new(),
        }
    }

    pub fn did(&self, action: SyncAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn pushed(&self) -> bool {
        self.did(SyncAction::PushedNewBranch) || self.did(SyncAction::PushedUpdate)
    }
}

/// Per-repository result inside a [`SessionSyncReport`].
#[derive(Debug, Clone)]
pub struct RepositorySync {
    pub repository: String,
    pub result: Result<SyncReport, SyncError>,
}

/// Results for every repository of one session, in registration order.
#[derive(Debug, Clone)]
pub struct SessionSyncReport {
    pub session: String,
    pub repositories: Vec<RepositorySync>,
}

impl SessionSyncReport {
    pub fn is_complete(&self) -> bool {
        self.repositories.iter().all(|r| r.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SyncError)> {
        self.repositories.iter().filter_map(|r| match &r.result {
            Ok(_) => None,
            Err(e) => Some((r.repository.as_str(), e)),
        })
    }
}

/// Mutable state threaded through the steps of one pass.
struct Pass {
    branch: String,
    on_remote: bool,
    committed: bool,
    pushed: bool,
}

enum Flow {
    Continue,
    Stop(SkipReason),
}

/// Runs [`PLAN`] against repositories through a [`GitRepo`].
pub struct BranchSync<'a> {
    git: &'a dyn GitRepo,
    reporter: &'a dyn Reporter,
}

impl<'a> BranchSync<'a> {
    pub fn new(git: &'a dyn GitRepo, reporter: &'a dyn Reporter) -> Self {
        Self { git, reporter }
    }

    /// Synchronize one repository.
    ///
    /// `Ok` covers both a completed pass and a skip; `Err` means a fatal step
    /// failed and nothing after it ran.
    pub fn sync_repository(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(request);
        let mut pass = Pass {
            branch: request.branch.clone().unwrap_or_default(),
            on_remote: false,
            committed: false,
            pushed: false,
        };

        for &(step, policy) in PLAN {
            debug!(label = %request.label, ?step, "sync step");
            let result = self.run_step(step, request, &mut pass, &mut report);
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(reason)) => {
                    info!(label = %request.label, ?reason, "repository skipped");
                    report.outcome = SyncOutcome::Skipped(reason);
                    return Ok(report);
                }
                Err(err) => match policy {
                    StepPolicy::Required => return Err(err),
                    StepPolicy::FatalOnConflict
                        if matches!(
                            err,
                            SyncError::MergeConflict { .. } | SyncError::Adapter { .. }
                        ) =>
                    {
                        return Err(err);
                    }
                    StepPolicy::BestEffort if err.is_tooling() => return Err(err),
                    StepPolicy::FatalOnConflict | StepPolicy::BestEffort => {
                        warn!(label = %request.label, ?step, error = %err, "best-effort step failed");
                        let message = err.to_string();
                        self.reporter.warn(&message);
                        report.warnings.push(message);
                    }
                    StepPolicy::Opportunistic => {
                        debug!(label = %request.label, ?step, error = %err, "skipped");
                    }
                },
            }
        }

        report.branch = Some(pass.branch);
        Ok(report)
    }

    fn run_step(
        &self,
        step: Step,
        request: &SyncRequest,
        pass: &mut Pass,
        report: &mut SyncReport,
    ) -> Result<Flow, SyncError> {
        let path = request.path.as_path();
        let label = request.label.as_str();
        let adapter = |source: GitError, committed: bool| SyncError::Adapter {
            label: label.to_string(),
            committed,
            source,
        };

        match step {
            Step::RepositoryCheck => {
                if !self.git.is_repository(path).map_err(|e| adapter(e, false))? {
                    self.reporter
                        .info(&format!("Skipping {}: not a git repository", label));
                    return Ok(Flow::Stop(SkipReason::NotARepository));
                }
            }

            Step::Checkout => {
                let current = self
                    .git
                    .current_branch(path)
                    .map_err(|e| adapter(e, false))?;
                let target = match (request.branch.as_deref(), current.as_deref()) {
                    (Some(target), _) => target.to_string(),
                    (None, Some(current)) => current.to_string(),
                    (None, None) => return Ok(Flow::Stop(SkipReason::NoBranch)),
                };
                pass.branch = target.clone();
                report.branch = Some(target.clone());

                if current.as_deref() != Some(target.as_str()) {
                    info!(label, branch = %target, "checking out");
                    self.git.checkout(path, &target).map_err(|source| {
                        classify(source, label, false, |source| SyncError::CheckoutFailed {
                            label: label.to_string(),
                            branch: target.clone(),
                            source,
                        })
                    })?;
                    report.actions.push(SyncAction::CheckedOut);
                }
            }

            Step::Fetch => {
                self.reporter.info(&format!("Fetching origin in {}", label));
                self.git.fetch_origin(path).map_err(|e| adapter(e, false))?;
                report.actions.push(SyncAction::Fetched);
            }

            Step::Pull => {
                pass.on_remote = self
                    .git
                    .is_branch_on_remote(path, &pass.branch)
                    .map_err(|e| adapter(e, false))?;
                if !pass.on_remote {
                    return Ok(Flow::Continue);
                }

                info!(label, branch = %pass.branch, "pulling");
                if let Err(source) = self.git.pull_current_branch(path) {
                    if source.is_tooling() {
                        return Err(adapter(source, false));
                    }
                    // Unknown conflict state must not reach the commit step.
                    let files = self
                        .git
                        .conflicted_files(path)
                        .map_err(|e| adapter(e, false))?;
                    if !files.is_empty() {
                        return Err(SyncError::MergeConflict {
                            label: label.to_string(),
                            branch: pass.branch.clone(),
                            files,
                        });
                    }
                    return Err(SyncError::PullFailed {
                        label: label.to_string(),
                        branch: pass.branch.clone(),
                        source,
                    });
                }
                report.actions.push(SyncAction::Pulled);
            }

            Step::Commit => {
                let commit_error = |source: GitError| {
                    classify(source, label, false, |source| SyncError::CommitFailed {
                        label: label.to_string(),
                        source,
                    })
                };
                if self
                    .git
                    .has_uncommitted_changes(path)
                    .map_err(|e| commit_error(e))?
                {
                    if let Ok(summary) = self.git.status_summary(path) {
                        self.reporter
                            .info(&format!("Committing changes in {} ({})", label, summary));
                    }
                    self.git
                        .commit_all(path, &request.commit_message)
                        .map_err(|e| commit_error(e))?;
                    pass.committed = true;
                    report.actions.push(SyncAction::Committed);
                }
            }

            Step::Push => {
                let phase = if pass.on_remote {
                    PushPhase::Update
                } else {
                    PushPhase::NewBranch
                };
                let committed = pass.committed;
                let branch = pass.branch.clone();
                let push_error = |source: GitError| {
                    classify(source, label, committed, |source| SyncError::PushFailed {
                        label: label.to_string(),
                        branch: branch.clone(),
                        phase,
                        committed,
                        source,
                    })
                };

                if phase == PushPhase::Update && !committed {
                    // Nothing new locally: an unreadable count errs toward pushing.
                    let ahead = self
                        .git
                        .commits_ahead_of_remote(path, &pass.branch)
                        .unwrap_or(1);
                    if ahead == 0 {
                        debug!(label, branch = %pass.branch, "branch up to date with origin");
                        return Ok(Flow::Continue);
                    }
                }

                info!(label, branch = %pass.branch, ?phase, "pushing");
                self.git
                    .push(path, &pass.branch, phase == PushPhase::NewBranch)
                    .map_err(push_error)?;
                pass.pushed = true;
                report.actions.push(match phase {
                    PushPhase::NewBranch => SyncAction::PushedNewBranch,
                    PushPhase::Update => SyncAction::PushedUpdate,
                });
                self.reporter
                    .success(&format!("Pushed '{}' in {}", pass.branch, label));
            }

            Step::CaptureRemote => {
                if !pass.pushed {
                    return Ok(Flow::Continue);
                }
                let url = self.git.remote_url(path, &pass.branch).ok().flatten();
                match url {
                    Some(url) => report.remote_url = Some(url),
                    None => {
                        return Err(SyncError::RemoteCaptureFailed {
                            label: label.to_string(),
                            branch: pass.branch.clone(),
                        });
                    }
                }
            }
        }

        Ok(Flow::Continue)
    }

    /// Synchronize every repository of `session`, in registration order.
    ///
    /// Each repository is targeted through its active context, or the most
    /// recently archived one when none is active. A failure is recorded and
    /// the remaining repositories still run. Pushed remote URLs are written
    /// back onto the active contexts.
    pub fn sync_session(
        &self,
        session: &mut Session,
        attribution: &str,
    ) -> crate::Result<SessionSyncReport> {
        session.require_conversations()?;
        let commit_message = commit_message(session, attribution);

        let targets: Vec<(String, Option<(PathBuf, Option<String>)>)> = session
            .conversations
            .iter()
            .map(|(repository, conversation)| {
                let target = conversation
                    .latest()
                    .map(|c| (c.project_path.clone(), c.branch.clone()));
                (repository.to_string(), target)
            })
            .collect();

        let mut repositories = Vec::with_capacity(targets.len());
        for (repository, target) in targets {
            let result = match target {
                None => Ok(SyncReport::skipped(
                    &repository,
                    Path::new(""),
                    SkipReason::NoContext,
                )),
                Some((path, branch)) => self.sync_repository(&SyncRequest {
                    path,
                    branch,
                    label: repository.clone(),
                    commit_message: commit_message.clone(),
                }),
            };

            if let Ok(report) = &result {
                record_on_active(session, &repository, report);
            }
            repositories.push(RepositorySync { repository, result });
        }

        Ok(SessionSyncReport {
            session: session.name.clone(),
            repositories,
        })
    }
}

fn record_on_active(session: &mut Session, repository: &str, report: &SyncReport) {
    let Some(context) = session
        .conversations
        .get_mut(repository)
        .and_then(|c| c.active_mut())
    else {
        return;
    };
    if context.branch.is_none() && report.outcome == SyncOutcome::Synced {
        context.branch = report.branch.clone();
    }
    if let Some(url) = &report.remote_url {
        context.remote_url = Some(url.clone());
    }
}

/// `WIP: Export for <key>` with a co-author trailer.
pub fn commit_message(session: &Session, attribution: &str) -> String {
    let subject = format!("WIP: Export for {}", session.display_key());
    if attribution.trim().is_empty() {
        subject
    } else {
        format!("{}\n\nCo-Authored-By: {}", subject, attribution.trim())
    }
}

/// Keep timeouts and a missing git binary out of step-specific errors.
fn classify(
    source: GitError,
    label: &str,
    committed: bool,
    wrap: impl FnOnce(GitError) -> SyncError,
) -> SyncError {
    match source {
        GitError::Failed { .. } => wrap(source),
        other => SyncError::Adapter {
            label: label.to_string(),
            committed,
            source: other,
        },
    }
}
