//! Command implementations for the worktrail CLI.
//!
//! Each command returns a result struct implementing [`Output`]; `main`
//! prints it as JSON or, with `-H`, as text. Commands are grouped by area:
//! - `session` - Session lifecycle, issues, notes and PRs
//! - `conversation` - Agent conversations per repository
//! - `time` - Pause, resume and totals
//! - `transfer` - Sync, export and import
//! - `config` - Show and edit config.kdl

mod config;
mod conversation;
mod session;
mod time;
mod transfer;

pub use config::*;
pub use conversation::*;
pub use session::*;
pub use time::*;
pub use transfer::*;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::git::{GitCli, GitRepo};
use crate::report::Reporter;
use crate::storage::SessionStore;
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Serialize a result struct, falling back to an error object.
pub(crate) fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Everything a command needs from its environment.
pub struct CommandContext<'a> {
    pub config: ResolvedConfig,
    pub reporter: &'a dyn Reporter,
    pub cwd: PathBuf,
    /// The calling agent's conversation id, if known
    pub agent_session_id: Option<String>,
}

impl<'a> CommandContext<'a> {
    pub fn git(&self) -> GitCli {
        GitCli::new(self.config.git_timeout.value)
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir.value
    }

    /// Open the store for reading.
    pub fn store(&self) -> Result<SessionStore> {
        SessionStore::open(self.data_dir(), self.reporter)
    }

    /// Open the store holding the index lock until it is dropped.
    pub fn store_mut(&self) -> Result<SessionStore> {
        SessionStore::open_locked(self.data_dir(), self.reporter)
    }

    /// Resolve an explicit identifier, or find the session the caller is in.
    pub fn target_session(&self, store: &SessionStore, id: Option<&str>) -> Result<String> {
        if let Some(id) = id {
            return store.resolve_name(id);
        }
        store
            .find_active_conversation(self.agent_session_id.as_deref(), &self.cwd)
            .map(|m| m.session)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no session for {} (pass a session name or issue key)",
                    self.cwd.display()
                ))
            })
    }

    /// Absolute form of a user-supplied path, defaulting to the cwd.
    pub fn project_path(&self, path: Option<&Path>) -> PathBuf {
        match path {
            None => self.cwd.clone(),
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.cwd.join(p),
        }
    }

    /// The agent id to record, or a generated manual one.
    pub fn agent_id(&self, explicit: Option<String>) -> String {
        explicit
            .or_else(|| self.agent_session_id.clone())
            .unwrap_or_else(|| format!("manual-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")))
    }

    /// Current branch at `path`, or `None` outside a repository.
    pub fn branch_at(&self, path: &Path) -> Option<String> {
        let git = self.git();
        match git.is_repository(path) {
            Ok(true) => git.current_branch(path).ok().flatten(),
            _ => None,
        }
    }
}

/// Repository identifier derived from a path: its final component.
pub fn repository_id(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "Cannot derive a repository identifier from {}; pass --repo",
                path.display()
            ))
        })
}
