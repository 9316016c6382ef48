//! Data models for worktrail entities.
//!
//! This module defines the core data structures:
//! - `Session` - One named unit of tracked work, possibly spanning repositories
//! - `Conversation` - Active plus archived agent conversations for one repository
//! - `ConversationContext` - A single AI-agent conversation instance
//! - `ConversationMap` - Ordered, key-unique map of repository id to conversation
//! - `WorkSession` - One contiguous interval of tracked effort

pub mod tracking;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

pub use tracking::{TimeSummary, Transition, format_duration};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    InProgress,
    Completed,
}

impl SessionStatus {
    /// Parse a status string, accepting dashed and spaced spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "in_progress" | "in-progress" | "inprogress" => Some(Self::InProgress),
            "completed" | "complete" | "done" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the session clock is currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeTrackingState {
    Running,
    #[default]
    Paused,
}

impl fmt::Display for TimeTrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// One contiguous interval of tracked effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    /// Who was working
    pub user: String,

    pub start: DateTime<Utc>,

    /// Absent while the interval is still open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl WorkSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A free-text note attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub created: DateTime<Utc>,
    pub text: String,
}

/// One concrete AI-agent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Opaque identifier owned by the agent process
    pub ai_agent_session_id: String,

    /// Working copy the agent runs in
    pub project_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,

    pub created: DateTime<Utc>,

    pub last_active: DateTime<Utc>,

    #[serde(default)]
    pub message_count: u64,

    /// Pull/merge request URLs or numbers, in the order they were recorded
    #[serde(default)]
    pub prs: Vec<String>,

    #[serde(default)]
    pub archived: bool,

    /// Remote URL captured after the last successful push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Set by an external summarizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ConversationContext {
    pub fn new(
        ai_agent_session_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        branch: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ai_agent_session_id: ai_agent_session_id.into(),
            project_path: project_path.into(),
            branch,
            base_branch: None,
            created: now,
            last_active: now,
            message_count: 0,
            prs: Vec::new(),
            archived: false,
            remote_url: None,
            summary: None,
        }
    }
}

/// Agent conversation history for one repository.
///
/// The active context can only leave the active slot through
/// [`Conversation::archive_active`], which freezes it at the end of the
/// archived list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    active_session: Option<ConversationContext>,

    #[serde(default)]
    archived_sessions: Vec<ConversationContext>,
}

impl Conversation {
    pub fn new(context: ConversationContext) -> Self {
        let mut conversation = Self::default();
        conversation.install(context);
        conversation
    }

    pub fn active(&self) -> Option<&ConversationContext> {
        self.active_session.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ConversationContext> {
        self.active_session.as_mut()
    }

    pub fn archived(&self) -> &[ConversationContext] {
        &self.archived_sessions
    }

    /// Move the active context to the archive. Returns false if none was open.
    pub fn archive_active(&mut self) -> bool {
        match self.active_session.take() {
            Some(mut context) => {
                context.archived = true;
                self.archived_sessions.push(context);
                true
            }
            None => false,
        }
    }

    /// Archive whatever is active, then make `context` the active one.
    pub fn install(&mut self, mut context: ConversationContext) -> bool {
        let archived = self.archive_active();
        context.archived = false;
        self.active_session = Some(context);
        archived
    }

    /// The active context, or the most recently archived one.
    pub fn latest(&self) -> Option<&ConversationContext> {
        self.active_session
            .as_ref()
            .or_else(|| self.archived_sessions.last())
    }

    /// Every context, archived first, active last.
    pub fn contexts(&self) -> impl Iterator<Item = &ConversationContext> {
        self.archived_sessions.iter().chain(self.active_session.iter())
    }
}

/// Conversations keyed by repository identifier, in registration order.
///
/// Keys are unique: inserting an existing key replaces its value in place.
/// Serialized as a JSON object; duplicate keys are rejected on load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMap {
    entries: Vec<(String, Conversation)>,
}

impl ConversationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Conversation> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Conversation> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Conversation) -> Option<Conversation> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(existing) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// The conversation for `key`, created empty if missing.
    pub fn entry(&mut self, key: &str) -> &mut Conversation {
        let index = match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_string(), Conversation::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Conversation)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for ConversationMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConversationMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = ConversationMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of repository identifier to conversation")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = ConversationMap::new();
                while let Some((key, value)) = access.next_entry::<String, Conversation>()? {
                    if map.contains_key(&key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate repository identifier '{}'",
                            key
                        )));
                    }
                    map.entries.push((key, value));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// One unit of tracked work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique, human-chosen name
    pub name: String,

    /// External ticket reference (e.g. "PROJ-123")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default)]
    pub status: SessionStatus,

    /// Configured workspace this session belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,

    #[serde(default)]
    pub conversations: ConversationMap,

    #[serde(default)]
    work_sessions: Vec<WorkSession>,

    #[serde(default)]
    time_tracking_state: TimeTrackingState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,

    pub created: DateTime<Utc>,

    pub last_active: DateTime<Utc>,
}

impl Session {
    /// Create an empty session. Time tracking starts paused.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            issue_key: None,
            goal: None,
            status: SessionStatus::default(),
            workspace_name: None,
            conversations: ConversationMap::new(),
            work_sessions: Vec::new(),
            time_tracking_state: TimeTrackingState::default(),
            notes: Vec::new(),
            created: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
    }

    /// Issue key if linked, otherwise the session name.
    pub fn display_key(&self) -> &str {
        self.issue_key.as_deref().unwrap_or(&self.name)
    }

    /// Reject the degenerate zero-conversation state.
    pub fn require_conversations(&self) -> crate::Result<()> {
        if self.conversations.is_empty() {
            return Err(crate::Error::NoConversations(self.name.clone()));
        }
        Ok(())
    }

    /// Register a conversation for `repository`, archiving the previous one.
    ///
    /// Returns true if an active context was archived.
    pub fn add_conversation(
        &mut self,
        repository: &str,
        context: ConversationContext,
        now: DateTime<Utc>,
    ) -> bool {
        let archived = self.conversations.entry(repository).install(context);
        self.touch(now);
        archived
    }

    pub fn work_sessions(&self) -> &[WorkSession] {
        &self.work_sessions
    }

    pub fn time_tracking_state(&self) -> TimeTrackingState {
        self.time_tracking_state
    }
}

/// Check that a session name is usable as an index key and a bundle path.
pub fn validate_name(name: &str) -> crate::Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Session name cannot be empty".to_string(),
        ));
    }
    if trimmed != name {
        return Err(crate::Error::InvalidInput(format!(
            "Session name cannot start or end with whitespace: '{}'",
            name
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) || name.chars().any(char::is_control)
    {
        return Err(crate::Error::InvalidInput(format!(
            "Session name contains invalid characters: '{}'",
            name
        )));
    }
    Ok(())
}
