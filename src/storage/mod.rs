//! Storage layer for worktrail sessions.
//!
//! All sessions live in one JSON index, `sessions.json`, inside the data
//! directory (`~/.local/share/worktrail/` by default):
//!
//! ```json
//! { "sessions": { "<name>": { ...Session... } } }
//! ```
//!
//! The index is read and written as a whole. Writes go to a temporary file
//! in the same directory and are renamed into place. Commands that mutate
//! the index open the store with [`SessionStore::open_locked`], which holds an
//! advisory lock on `sessions.lock` from load until the store is dropped, so
//! two `wt` processes cannot interleave their read-modify-write cycles.

pub mod lock;

pub use lock::IndexLock;

use crate::models::{
    ConversationContext, Session, SessionStatus, TimeTrackingState, validate_name,
};
use crate::report::Reporter;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Index file name inside the data directory.
pub const INDEX_FILE: &str = "sessions.json";

/// Lock file name inside the data directory.
pub const LOCK_FILE: &str = "sessions.lock";

/// Where an unreadable index is copied before being reset.
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// On-disk shape of the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
}

/// Parameters for [`SessionStore::create`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub name: String,
    pub goal: Option<String>,
    pub repository: String,
    pub project_path: PathBuf,
    pub agent_session_id: String,
    pub branch: Option<String>,
    pub issue_key: Option<String>,
    pub workspace_name: Option<String>,
    /// Who the first work interval is booked to
    pub user: String,
}

/// Filter for [`SessionStore::list`].
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub workspace: Option<String>,
    pub running_only: bool,
}

/// A conversation located by [`SessionStore::find_active_conversation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMatch {
    pub session: String,
    pub repository: String,
    /// True when found by agent id rather than by directory
    pub by_agent_id: bool,
}

/// Session repository backed by the JSON index.
pub struct SessionStore {
    root: PathBuf,
    index: SessionIndex,
    _lock: Option<IndexLock>,
}

impl SessionStore {
    /// Open the store read-only (no lock held).
    pub fn open(root: &Path, reporter: &dyn Reporter) -> Result<Self> {
        fs::create_dir_all(root)?;
        let index = load_index(root, reporter)?;
        Ok(Self {
            root: root.to_path_buf(),
            index,
            _lock: None,
        })
    }

    /// Open the store for a read-modify-write cycle.
    ///
    /// Blocks until no other process holds the index lock.
    pub fn open_locked(root: &Path, reporter: &dyn Reporter) -> Result<Self> {
        fs::create_dir_all(root)?;
        let lock = IndexLock::acquire(&root.join(LOCK_FILE))?;
        let index = load_index(root, reporter)?;
        Ok(Self {
            root: root.to_path_buf(),
            index,
            _lock: Some(lock),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Persist the whole index atomically.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.index)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.index_path())
            .map_err(|e| Error::Io(e.error))?;
        debug!(
            path = %self.index_path().display(),
            sessions = self.index.sessions.len(),
            "saved session index"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.sessions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.sessions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.sessions.keys().map(String::as_str)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.index.sessions.values()
    }

    /// Exact lookup by name.
    pub fn get(&self, name: &str) -> Result<&Session> {
        self.index
            .sessions
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Session> {
        self.index
            .sessions
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Create a session with its first conversation.
    pub fn create(&mut self, new: NewSession, now: DateTime<Utc>) -> Result<&Session> {
        validate_name(&new.name)?;
        if self.contains(&new.name) {
            return Err(Error::DuplicateName(new.name));
        }
        if let Some(key) = new.issue_key.as_deref() {
            self.ensure_issue_key_free(key, &new.name)?;
        }

        let mut session = Session::new(new.name.clone(), now);
        session.goal = new.goal;
        session.issue_key = new.issue_key;
        session.workspace_name = new.workspace_name;
        session.add_conversation(
            &new.repository,
            ConversationContext::new(new.agent_session_id, new.project_path, new.branch, now),
            now,
        );
        session.start_tracking(&new.user, now);

        debug!(session = %new.name, repository = %new.repository, "created session");
        Ok(self.index.sessions.entry(new.name).or_insert(session))
    }

    /// Register a conversation, archiving the repository's active one.
    ///
    /// Returns true if a previous context was archived.
    pub fn add_conversation(
        &mut self,
        name: &str,
        repository: &str,
        agent_session_id: &str,
        project_path: &Path,
        branch: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let session = self.get_mut(name)?;
        let context = ConversationContext::new(agent_session_id, project_path, branch, now);
        Ok(session.add_conversation(repository, context, now))
    }

    /// Resolve an identifier: exact session name first, then exact issue key.
    ///
    /// An issue key shared by several sessions is ambiguous and resolves to
    /// nothing.
    pub fn resolve(&self, identifier: &str) -> Result<&Session> {
        if let Some(session) = self.index.sessions.get(identifier) {
            return Ok(session);
        }

        let mut by_key = self
            .index
            .sessions
            .values()
            .filter(|s| s.issue_key.as_deref() == Some(identifier));
        match (by_key.next(), by_key.next()) {
            (Some(session), None) => Ok(session),
            (Some(_), Some(_)) => Err(Error::NotFound(format!(
                "{} (issue key matches more than one session)",
                identifier
            ))),
            _ => Err(Error::NotFound(identifier.to_string())),
        }
    }

    /// Resolve an identifier to the session name.
    pub fn resolve_name(&self, identifier: &str) -> Result<String> {
        self.resolve(identifier).map(|s| s.name.clone())
    }

    /// Replace a stored session with `session`, bumping `last_active`.
    pub fn update(&mut self, mut session: Session, now: DateTime<Utc>) -> Result<()> {
        if !self.contains(&session.name) {
            return Err(Error::NotFound(session.name));
        }
        session.touch(now);
        self.index.sessions.insert(session.name.clone(), session);
        Ok(())
    }

    /// Insert or overwrite without touching timestamps (used by import).
    pub fn put(&mut self, session: Session) {
        self.index.sessions.insert(session.name.clone(), session);
    }

    pub fn delete(&mut self, name: &str) -> Result<Session> {
        self.index
            .sessions
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn rename(&mut self, old: &str, new: &str, now: DateTime<Utc>) -> Result<()> {
        validate_name(new)?;
        if self.contains(new) {
            return Err(Error::DuplicateName(new.to_string()));
        }
        let mut session = self.delete(old)?;
        session.name = new.to_string();
        session.touch(now);
        self.index.sessions.insert(new.to_string(), session);
        Ok(())
    }

    /// Apply `f` to one session and bump its `last_active`.
    pub fn modify<T>(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let session = self.get_mut(name)?;
        let value = f(session)?;
        session.touch(now);
        Ok(value)
    }

    /// Link an issue and rewrite the goal as `"<KEY>: <title>"`.
    pub fn link_issue(
        &mut self,
        name: &str,
        key: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("Issue key cannot be empty".to_string()));
        }
        self.ensure_issue_key_free(key, name)?;
        self.modify(name, now, |session| {
            session.issue_key = Some(key.to_string());
            session.goal = Some(match title {
                Some(title) if !title.trim().is_empty() => format!("{}: {}", key, title.trim()),
                _ => key.to_string(),
            });
            Ok(())
        })
    }

    pub fn set_status(&mut self, name: &str, status: SessionStatus, now: DateTime<Utc>) -> Result<()> {
        self.modify(name, now, |session| {
            session.status = status;
            Ok(())
        })
    }

    pub fn add_note(&mut self, name: &str, text: &str, now: DateTime<Utc>) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("Note cannot be empty".to_string()));
        }
        self.modify(name, now, |session| {
            session.notes.push(crate::models::Note {
                created: now,
                text: text.to_string(),
            });
            Ok(())
        })
    }

    /// Record a PR/MR reference on a repository's active conversation.
    ///
    /// Returns false if the reference was already recorded.
    pub fn add_pr(&mut self, name: &str, repository: &str, pr: &str, now: DateTime<Utc>) -> Result<bool> {
        self.modify(name, now, |session| {
            let context = session
                .conversations
                .get_mut(repository)
                .and_then(|c| c.active_mut())
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "active conversation for '{}' in session '{}'",
                        repository, name
                    ))
                })?;
            if context.prs.iter().any(|p| p == pr) {
                return Ok(false);
            }
            context.prs.push(pr.to_string());
            context.last_active = now;
            Ok(true)
        })
    }

    /// Sessions matching `filter`, most recently active first.
    pub fn list(&self, filter: &SessionFilter) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self
            .index
            .sessions
            .values()
            .filter(|s| filter.status.is_none_or(|status| s.status == status))
            .filter(|s| {
                filter
                    .workspace
                    .as_deref()
                    .is_none_or(|w| s.workspace_name.as_deref() == Some(w))
            })
            .filter(|s| !filter.running_only || s.time_tracking_state() == TimeTrackingState::Running)
            .collect();
        sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active).then(a.name.cmp(&b.name)));
        sessions
    }

    /// Find the conversation a caller is in.
    ///
    /// An active context whose agent id matches wins. Otherwise the active
    /// context whose `project_path` is `cwd` or its closest ancestor is used.
    pub fn find_active_conversation(
        &self,
        agent_session_id: Option<&str>,
        cwd: &Path,
    ) -> Option<ConversationMatch> {
        if let Some(agent_id) = agent_session_id.filter(|id| !id.is_empty()) {
            for session in self.index.sessions.values() {
                for (repository, conversation) in session.conversations.iter() {
                    if conversation
                        .active()
                        .is_some_and(|c| c.ai_agent_session_id == agent_id)
                    {
                        return Some(ConversationMatch {
                            session: session.name.clone(),
                            repository: repository.to_string(),
                            by_agent_id: true,
                        });
                    }
                }
            }
        }

        let mut best: Option<(usize, ConversationMatch)> = None;
        for session in self.index.sessions.values() {
            for (repository, conversation) in session.conversations.iter() {
                let Some(context) = conversation.active() else {
                    continue;
                };
                if !cwd.starts_with(&context.project_path) {
                    continue;
                }
                let depth = context.project_path.components().count();
                if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                    best = Some((
                        depth,
                        ConversationMatch {
                            session: session.name.clone(),
                            repository: repository.to_string(),
                            by_agent_id: false,
                        },
                    ));
                }
            }
        }
        best.map(|(_, m)| m)
    }

    fn ensure_issue_key_free(&self, key: &str, owner: &str) -> Result<()> {
        if let Some(other) = self
            .index
            .sessions
            .values()
            .find(|s| s.name != owner && s.issue_key.as_deref() == Some(key))
        {
            return Err(Error::DuplicateIssueKey {
                key: key.to_string(),
                session: other.name.clone(),
            });
        }
        Ok(())
    }
}

/// Load the index, recovering from a missing, empty or corrupt file.
///
/// A file that is not valid UTF-8 JSON is copied to `sessions.json.corrupt`
/// and replaced by an empty index in memory; the next save overwrites it.
/// If that copy cannot be made the load fails, so the only copy survives.
pub fn load_index(root: &Path, reporter: &dyn Reporter) -> Result<SessionIndex> {
    let path = root.join(INDEX_FILE);
    if !path.exists() {
        return Ok(SessionIndex::default());
    }

    let bytes = fs::read(&path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(SessionIndex::default());
    }

    let error = match serde_json::from_slice::<SessionIndex>(&bytes) {
        Ok(mut index) => {
            // Keys are authoritative; a hand-edited record may disagree.
            for (key, session) in index.sessions.iter_mut() {
                if &session.name != key {
                    session.name = key.clone();
                }
            }
            return Ok(index);
        }
        Err(e) => e,
    };

    let backup = path.with_extension(format!("json.{}", CORRUPT_SUFFIX));
    if let Err(copy_error) = fs::copy(&path, &backup) {
        warn!(path = %path.display(), error = %copy_error, "could not back up corrupt session index");
        return Err(Error::Io(std::io::Error::new(
            copy_error.kind(),
            format!(
                "Session index {} is not valid JSON ({}) and could not be copied to {} ({}); move it aside by hand",
                path.display(),
                error,
                backup.display(),
                copy_error
            ),
        )));
    }

    warn!(path = %path.display(), error = %error, "session index is corrupt, starting empty");
    reporter.warn(&format!(
        "Session index {} is not valid JSON ({}). Starting with an empty index; the old file was copied to {}",
        path.display(),
        error,
        backup.display()
    ));
    Ok(SessionIndex::default())
}
