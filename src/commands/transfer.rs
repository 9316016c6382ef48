//! Sync, export and import commands.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::{CommandContext, Output, json};
use crate::bundle::{
    self, ExportOptions, ImportAction, ImportPlan, ImportPolicy, ManifestEntry,
};
use crate::sync::{BranchSync, RepositorySync, SessionSyncReport, SyncError, SyncOutcome, SyncReport};
use crate::{Error, Result};

/// One repository's sync result, flattened for output.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryView {
    pub session: String,
    pub repository: String,
    /// "synced", "skipped" or "failed"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// A local WIP commit is waiting to be pushed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub resumable: bool,
}

impl RepositoryView {
    fn new(session: &str, sync: &RepositorySync) -> Self {
        let mut view = Self {
            session: session.to_string(),
            repository: sync.repository.clone(),
            status: "synced",
            report: None,
            error: None,
            error_kind: None,
            resumable: false,
        };
        match &sync.result {
            Ok(report) => {
                if matches!(report.outcome, SyncOutcome::Skipped(_)) {
                    view.status = "skipped";
                }
                view.report = Some(report.clone());
            }
            Err(err) => {
                view.status = "failed";
                view.error = Some(err.to_string());
                view.error_kind = Some(err.kind());
                view.resumable = err.is_resumable();
            }
        }
        view
    }

    fn human_line(&self) -> String {
        match (&self.report, &self.error) {
            (_, Some(error)) => format!("  ✗ {}: {}", self.repository, error),
            (Some(report), None) => {
                let branch = report.branch.as_deref().unwrap_or("-");
                let detail = match report.outcome {
                    SyncOutcome::Skipped(reason) => format!("skipped ({:?})", reason),
                    SyncOutcome::Synced if report.pushed() => "pushed".to_string(),
                    SyncOutcome::Synced => "up to date".to_string(),
                };
                let mut line = format!("  ✓ {} [{}] {}", self.repository, branch, detail);
                for warning in &report.warnings {
                    line.push_str(&format!("\n    warning: {}", warning));
                }
                line
            }
            (None, None) => format!("  ? {}", self.repository),
        }
    }
}

fn repository_views(report: &SessionSyncReport) -> Vec<RepositoryView> {
    report
        .repositories
        .iter()
        .map(|r| RepositoryView::new(&report.session, r))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub session: String,
    pub complete: bool,
    pub repositories: Vec<RepositoryView>,
    #[serde(skip)]
    first_failure: Option<(String, SyncError)>,
}

impl SyncResult {
    /// The first repository failure as a command error.
    pub fn failure(&self) -> Option<Error> {
        self.first_failure
            .as_ref()
            .map(|(label, source)| Error::Sync {
                label: label.clone(),
                source: source.clone(),
            })
    }
}

impl Output for SyncResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Session '{}': {}",
            self.session,
            if self.complete { "synchronized" } else { "incomplete" }
        )];
        lines.extend(self.repositories.iter().map(RepositoryView::human_line));
        lines.join("\n")
    }
}

/// Run the branch sync engine over every repository of a session.
///
/// Remote URLs and branches learned during the run are saved even when a
/// repository fails; the failure is then surfaced via [`SyncResult::failure`].
pub fn session_sync(ctx: &CommandContext, id: Option<&str>) -> Result<SyncResult> {
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, id)?;
    let mut session = store.get(&name)?.clone();

    let git = ctx.git();
    let engine = BranchSync::new(&git, ctx.reporter);
    let report = engine.sync_session(&mut session, &ctx.config.attribution.value)?;

    store.update(session, Utc::now())?;
    store.save()?;

    let first_failure = report
        .failures()
        .next()
        .map(|(label, err)| (label.to_string(), err.clone()));
    Ok(SyncResult {
        session: name,
        complete: report.is_complete(),
        repositories: repository_views(&report),
        first_failure,
    })
}

#[derive(Serialize)]
pub struct ExportResult {
    pub path: PathBuf,
    pub session_count: usize,
    pub sessions: Vec<ManifestEntry>,
    pub repositories: Vec<RepositoryView>,
}

impl Output for ExportResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Exported {} session(s) to {}",
            self.session_count,
            self.path.display()
        )];
        for entry in &self.sessions {
            let partial = if entry.partial { " (partial)" } else { "" };
            lines.push(format!("{}{}", entry.name, partial));
            lines.extend(
                self.repositories
                    .iter()
                    .filter(|r| r.session == entry.name)
                    .map(RepositoryView::human_line),
            );
        }
        lines.join("\n")
    }
}

/// Synchronize the selected sessions and bundle them.
///
/// With no identifiers and no `--all`, the session the caller is in is
/// exported.
pub fn export(
    ctx: &CommandContext,
    ids: &[String],
    all: bool,
    output: Option<&Path>,
    allow_partial: bool,
) -> Result<ExportResult> {
    let mut store = ctx.store_mut()?;
    let names: Vec<String> = if all {
        store.names().map(str::to_string).collect()
    } else if ids.is_empty() {
        vec![ctx.target_session(&store, None)?]
    } else {
        let mut seen = BTreeSet::new();
        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            let name = store.resolve_name(id)?;
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        names
    };

    let now = Utc::now();
    let path = match output {
        Some(path) => ctx.project_path(Some(path)),
        None => ctx.cwd.join(bundle::default_bundle_name(&names, now)),
    };

    let git = ctx.git();
    let engine = BranchSync::new(&git, ctx.reporter);
    let options = ExportOptions {
        allow_partial,
        attribution: ctx.config.attribution.value.clone(),
    };
    let summary =
        bundle::export_sessions(&mut store, &names, &engine, ctx.reporter, &options, &path, now)?;
    ctx.reporter.success(&format!(
        "Exported {} session(s) to {}",
        summary.manifest.session_count,
        path.display()
    ));

    Ok(ExportResult {
        path: summary.path,
        session_count: summary.manifest.session_count,
        sessions: summary.manifest.sessions,
        repositories: summary.sync.iter().flat_map(repository_views).collect(),
    })
}

#[derive(Serialize)]
pub struct ImportResult {
    pub bundle: PathBuf,
    pub dry_run: bool,
    pub policy: ImportPolicy,
    pub added: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub plan: ImportPlan,
}

impl Output for ImportResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let prefix = if self.dry_run { "Would import" } else { "Imported" };
        let mut lines = vec![format!(
            "{} from {}: {} added, {} replaced, {} skipped",
            prefix,
            self.bundle.display(),
            self.added,
            self.replaced,
            self.skipped
        )];
        for planned in &self.plan.sessions {
            let marker = match planned.action {
                ImportAction::Add => "+",
                ImportAction::Replace => "~",
                ImportAction::Skip => "=",
            };
            lines.push(format!("  {} {}", marker, planned.name));
        }
        lines.join("\n")
    }
}

/// Import a bundle under `policy`; `dry_run` only reports the plan.
pub fn import(
    ctx: &CommandContext,
    bundle_path: &Path,
    policy: ImportPolicy,
    dry_run: bool,
) -> Result<ImportResult> {
    let path = ctx.project_path(Some(bundle_path));
    let incoming = bundle::read_bundle(&path)?;

    let mut store = ctx.store_mut()?;
    let plan = bundle::plan_import(&incoming, &store, policy);
    for planned in plan.sessions.iter().filter(|p| p.action == ImportAction::Skip) {
        ctx.reporter.warn(&format!(
            "Session '{}' already exists locally; keeping the local copy",
            planned.name
        ));
    }
    if !dry_run {
        bundle::apply_import(&plan, incoming, &mut store)?;
        store.save()?;
    }

    Ok(ImportResult {
        bundle: path,
        dry_run,
        policy,
        added: plan.count(ImportAction::Add),
        replaced: plan.count(ImportAction::Replace),
        skipped: plan.count(ImportAction::Skip),
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::context;
    use crate::commands::{session_new, session_show};
    use crate::sync::SyncAction;
    use crate::test_utils::{GitFixture, git};
    use tempfile::TempDir;

    #[test]
    fn test_sync_commits_and_pushes_session_branch() {
        let fixture = GitFixture::new();
        git(&fixture.work, &["checkout", "-b", "feature/login"]);
        let data = fixture.root.path().join("data");
        let ctx = context(&data, &fixture.work, None);
        session_new(&ctx, "login", None, None, None, Some("app".into()), None, None).unwrap();

        fixture.write("login.rs", "fn login() {}\n");
        let result = session_sync(&ctx, None).unwrap();
        assert!(result.complete);
        assert!(result.failure().is_none());
        let report = result.repositories[0].report.as_ref().unwrap();
        assert!(report.did(SyncAction::Committed));
        assert!(report.did(SyncAction::PushedNewBranch));
        assert!(fixture.remote_has_branch("feature/login"));

        let shown = session_show(&ctx, Some("login")).unwrap();
        let active = shown.session.conversations.get("app").unwrap().active().unwrap();
        assert!(active.remote_url.is_some());
    }

    #[test]
    fn test_sync_reports_failure_after_saving() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("plain");
        std::fs::create_dir_all(&project).unwrap();
        let ctx = context(&temp.path().join("data"), &project, None);
        session_new(&ctx, "notes", None, None, None, None, None, None).unwrap();

        // Not a repository: skipped, not failed
        let result = session_sync(&ctx, Some("notes")).unwrap();
        assert!(result.complete);
        assert_eq!(result.repositories[0].status, "skipped");
    }

    #[test]
    fn test_export_then_import_elsewhere() {
        let fixture = GitFixture::new();
        let data = fixture.root.path().join("data");
        let ctx = context(&data, &fixture.work, None);
        session_new(&ctx, "login", None, Some("PROJ-1".into()), None, None, None, None).unwrap();

        let out = fixture.root.path().join("bundle.tar.gz");
        let exported = export(&ctx, &["PROJ-1".to_string()], false, Some(&out), false).unwrap();
        assert_eq!(exported.session_count, 1);
        assert_eq!(exported.sessions[0].name, "login");
        assert!(!exported.sessions[0].partial);
        assert!(out.exists());

        let teammate = context(&fixture.root.path().join("teammate-data"), fixture.root.path(), None);
        let preview = import(&teammate, &out, ImportPolicy::Merge, true).unwrap();
        assert_eq!(preview.added, 1);
        assert!(matches!(session_show(&teammate, Some("login")), Err(Error::NotFound(_))));

        let imported = import(&teammate, &out, ImportPolicy::Merge, false).unwrap();
        assert_eq!(imported.added, 1);
        let shown = session_show(&teammate, Some("PROJ-1")).unwrap();
        assert_eq!(shown.session.name, "login");

        let again = import(&teammate, &out, ImportPolicy::Merge, false).unwrap();
        assert_eq!(again.skipped, 1);
    }

    #[test]
    fn test_export_without_session_in_cwd_fails() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp.path().join("data"), temp.path(), None);
        assert!(matches!(
            export(&ctx, &[], false, None, false),
            Err(Error::NotFound(_))
        ));
    }
}
