//! Session lifecycle commands.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CommandContext, Output, TimeView, json, repository_id};
use crate::models::{Session, SessionStatus, TimeTrackingState, format_duration};
use crate::storage::{NewSession, SessionFilter};
use crate::{Error, Result};

#[derive(Serialize)]
pub struct SessionCreated {
    pub name: String,
    pub repository: String,
    pub project_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub user: String,
}

impl Output for SessionCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Created session '{}'", self.name)];
        let branch = self
            .branch
            .as_deref()
            .map(|b| format!(" on {}", b))
            .unwrap_or_default();
        lines.push(format!(
            "  {} at {}{}",
            self.repository,
            self.project_path.display(),
            branch
        ));
        if let Some(workspace) = &self.workspace {
            lines.push(format!("  Workspace: {}", workspace));
        }
        lines.push(format!("  Clock running for {}", self.user));
        lines.join("\n")
    }
}

/// Create a session with its first conversation and start its clock.
#[allow(clippy::too_many_arguments)]
pub fn session_new(
    ctx: &CommandContext,
    name: &str,
    goal: Option<String>,
    issue: Option<String>,
    path: Option<&Path>,
    repo: Option<String>,
    agent_id: Option<String>,
    workspace: Option<String>,
) -> Result<SessionCreated> {
    let project_path = ctx.project_path(path);
    let repository = match repo {
        Some(repo) => repo,
        None => repository_id(&project_path)?,
    };
    let workspace = match workspace {
        Some(name) => {
            if ctx.config.workspace(&name).is_none() {
                return Err(Error::InvalidInput(format!(
                    "Unknown workspace '{}'. Add it with `wt config set workspace.{} <path>`",
                    name, name
                )));
            }
            Some(name)
        }
        None => ctx
            .config
            .workspace_for_path(&project_path)
            .map(|w| w.name.clone()),
    };
    let branch = ctx.branch_at(&project_path);
    let user = ctx.config.user.value.clone();

    let mut store = ctx.store_mut()?;
    store.create(
        NewSession {
            name: name.to_string(),
            goal,
            repository: repository.clone(),
            project_path: project_path.clone(),
            agent_session_id: ctx.agent_id(agent_id),
            branch: branch.clone(),
            issue_key: issue,
            workspace_name: workspace.clone(),
            user: user.clone(),
        },
        Utc::now(),
    )?;
    store.save()?;
    ctx.reporter.success(&format!("Created session '{}'", name));

    Ok(SessionCreated {
        name: name.to_string(),
        repository,
        project_path,
        branch,
        workspace,
        user,
    })
}

/// One row of `wt session list`.
#[derive(Serialize)]
pub struct SessionSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub repositories: Vec<String>,
    pub time_tracking_state: TimeTrackingState,
    pub tracked_seconds: i64,
    pub last_active: DateTime<Utc>,
}

impl SessionSummary {
    fn new(session: &Session, now: DateTime<Utc>) -> Self {
        let time = session.time_summary(now);
        Self {
            name: session.name.clone(),
            issue_key: session.issue_key.clone(),
            goal: session.goal.clone(),
            status: session.status,
            workspace: session.workspace_name.clone(),
            repositories: session.conversations.keys().map(str::to_string).collect(),
            time_tracking_state: time.state,
            tracked_seconds: time.total.num_seconds(),
            last_active: session.last_active,
        }
    }
}

#[derive(Serialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

impl Output for SessionList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No sessions.".to_string();
        }
        let mut lines = vec![format!("{} session(s):", self.count)];
        for s in &self.sessions {
            let clock = match s.time_tracking_state {
                TimeTrackingState::Running => "▶",
                TimeTrackingState::Paused => " ",
            };
            let tracked = format_duration(chrono::Duration::seconds(s.tracked_seconds));
            let goal = s
                .goal
                .as_deref()
                .map(|g| format!("  {}", g))
                .unwrap_or_default();
            lines.push(format!(
                "{} {} [{}] {} ({}){}",
                clock,
                s.name,
                s.status,
                tracked,
                s.repositories.join(", "),
                goal
            ));
        }
        lines.join("\n")
    }
}

pub fn session_list(
    ctx: &CommandContext,
    status: Option<&str>,
    workspace: Option<String>,
    running: bool,
) -> Result<SessionList> {
    let status = status.map(parse_status).transpose()?;
    let store = ctx.store()?;
    let now = Utc::now();
    let sessions: Vec<SessionSummary> = store
        .list(&SessionFilter {
            status,
            workspace,
            running_only: running,
        })
        .into_iter()
        .map(|s| SessionSummary::new(s, now))
        .collect();
    Ok(SessionList {
        count: sessions.len(),
        sessions,
    })
}

#[derive(Serialize)]
pub struct SessionShown {
    pub session: Session,
    pub time: TimeView,
}

impl Output for SessionShown {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let s = &self.session;
        let mut lines = vec![format!("Session: {}", s.name)];
        if let Some(key) = &s.issue_key {
            lines.push(format!("Issue: {}", key));
        }
        if let Some(goal) = &s.goal {
            lines.push(format!("Goal: {}", goal));
        }
        lines.push(format!("Status: {}", s.status));
        if let Some(workspace) = &s.workspace_name {
            lines.push(format!("Workspace: {}", workspace));
        }
        lines.push(format!(
            "Time: {} ({})",
            self.time.total, self.time.state
        ));
        lines.push(String::new());
        lines.push(format!("Conversations ({}):", s.conversations.len()));
        for (repository, conversation) in s.conversations.iter() {
            match conversation.active() {
                Some(active) => {
                    let branch = active.branch.as_deref().unwrap_or("-");
                    lines.push(format!(
                        "  {} [{}] {} ({})",
                        repository,
                        branch,
                        active.project_path.display(),
                        active.ai_agent_session_id
                    ));
                    for pr in &active.prs {
                        lines.push(format!("    PR: {}", pr));
                    }
                }
                None => lines.push(format!("  {} (no active conversation)", repository)),
            }
            if !conversation.archived().is_empty() {
                lines.push(format!("    {} archived", conversation.archived().len()));
            }
        }
        if !s.notes.is_empty() {
            lines.push(String::new());
            lines.push(format!("Notes ({}):", s.notes.len()));
            for note in &s.notes {
                lines.push(format!(
                    "  {} {}",
                    note.created.format("%Y-%m-%d %H:%M"),
                    note.text
                ));
            }
        }
        lines.join("\n")
    }
}

pub fn session_show(ctx: &CommandContext, id: Option<&str>) -> Result<SessionShown> {
    let store = ctx.store()?;
    let name = ctx.target_session(&store, id)?;
    let session = store.get(&name)?.clone();
    session.require_conversations()?;
    let time = TimeView::new(&session, Utc::now());
    Ok(SessionShown { session, time })
}

#[derive(Serialize)]
pub struct SessionDeleted {
    pub name: String,
}

impl Output for SessionDeleted {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Deleted session '{}'", self.name)
    }
}

pub fn session_delete(ctx: &CommandContext, id: &str) -> Result<SessionDeleted> {
    let mut store = ctx.store_mut()?;
    let name = store.resolve_name(id)?;
    store.delete(&name)?;
    store.save()?;
    Ok(SessionDeleted { name })
}

#[derive(Serialize)]
pub struct SessionRenamed {
    pub old_name: String,
    pub new_name: String,
}

impl Output for SessionRenamed {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Renamed session '{}' to '{}'", self.old_name, self.new_name)
    }
}

pub fn session_rename(ctx: &CommandContext, id: &str, new_name: &str) -> Result<SessionRenamed> {
    let mut store = ctx.store_mut()?;
    let old_name = store.resolve_name(id)?;
    store.rename(&old_name, new_name, Utc::now())?;
    store.save()?;
    Ok(SessionRenamed {
        old_name,
        new_name: new_name.to_string(),
    })
}

#[derive(Serialize)]
pub struct StatusChanged {
    pub name: String,
    pub status: SessionStatus,
}

impl Output for StatusChanged {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Session '{}' is now {}", self.name, self.status)
    }
}

pub fn session_status(
    ctx: &CommandContext,
    status: &str,
    session: Option<&str>,
) -> Result<StatusChanged> {
    let status = parse_status(status)?;
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, session)?;
    store.set_status(&name, status, Utc::now())?;
    store.save()?;
    Ok(StatusChanged { name, status })
}

#[derive(Serialize)]
pub struct IssueLinked {
    pub name: String,
    pub issue_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl Output for IssueLinked {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.goal {
            Some(goal) => format!("Linked {} to '{}': {}", self.issue_key, self.name, goal),
            None => format!("Linked {} to '{}'", self.issue_key, self.name),
        }
    }
}

pub fn session_link(
    ctx: &CommandContext,
    key: &str,
    title: Option<&str>,
    session: Option<&str>,
) -> Result<IssueLinked> {
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, session)?;
    store.link_issue(&name, key, title, Utc::now())?;
    store.save()?;
    let linked = store.get(&name)?;
    Ok(IssueLinked {
        issue_key: linked.issue_key.clone().unwrap_or_else(|| key.to_string()),
        goal: linked.goal.clone(),
        name,
    })
}

#[derive(Serialize)]
pub struct NoteAdded {
    pub name: String,
    pub note_count: usize,
}

impl Output for NoteAdded {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Added note to '{}' ({} note(s))",
            self.name, self.note_count
        )
    }
}

pub fn session_note(ctx: &CommandContext, text: &str, session: Option<&str>) -> Result<NoteAdded> {
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, session)?;
    store.add_note(&name, text, Utc::now())?;
    store.save()?;
    let note_count = store.get(&name)?.notes.len();
    Ok(NoteAdded { name, note_count })
}

#[derive(Serialize)]
pub struct PrRecorded {
    pub name: String,
    pub repository: String,
    pub pr: String,
    /// False if the reference was already recorded
    pub added: bool,
}

impl Output for PrRecorded {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.added {
            format!("Recorded {} on {}/{}", self.pr, self.name, self.repository)
        } else {
            format!(
                "{} is already recorded on {}/{}",
                self.pr, self.name, self.repository
            )
        }
    }
}

/// Record a PR on a repository's active conversation.
///
/// Without `--repo` the repository is the conversation the caller is in, or
/// the session's only repository.
pub fn session_pr(
    ctx: &CommandContext,
    pr: &str,
    repo: Option<String>,
    session: Option<&str>,
) -> Result<PrRecorded> {
    let pr = pr.trim();
    if pr.is_empty() {
        return Err(Error::InvalidInput("PR reference cannot be empty".to_string()));
    }
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, session)?;
    let repository = match repo {
        Some(repo) => repo,
        None => {
            let here = store
                .find_active_conversation(ctx.agent_session_id.as_deref(), &ctx.cwd)
                .filter(|m| m.session == name)
                .map(|m| m.repository);
            match here {
                Some(repository) => repository,
                None => only_repository(store.get(&name)?)?,
            }
        }
    };
    let added = store.add_pr(&name, &repository, pr, Utc::now())?;
    if added {
        store.save()?;
    } else {
        ctx.reporter
            .warn(&format!("{} is already recorded on {}", pr, repository));
    }
    Ok(PrRecorded {
        name,
        repository,
        pr: pr.to_string(),
        added,
    })
}

fn only_repository(session: &Session) -> Result<String> {
    session.require_conversations()?;
    let mut keys = session.conversations.keys();
    match (keys.next(), keys.next()) {
        (Some(only), None) => Ok(only.to_string()),
        _ => Err(Error::InvalidInput(format!(
            "Session '{}' spans several repositories; pass --repo",
            session.name
        ))),
    }
}

fn parse_status(status: &str) -> Result<SessionStatus> {
    SessionStatus::parse(status).ok_or_else(|| {
        Error::InvalidInput(format!(
            "Unknown status '{}'. Use created, in_progress or completed",
            status
        ))
    })
}
