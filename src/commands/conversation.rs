//! Agent conversation commands.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::{CommandContext, Output, json, repository_id};
use crate::models::ConversationContext;
use crate::{Error, Result};

#[derive(Serialize)]
pub struct ConversationAdded {
    pub session: String,
    pub repository: String,
    pub agent_session_id: String,
    pub project_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// True if the repository's previous conversation was archived
    pub archived_previous: bool,
}

impl Output for ConversationAdded {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "Added conversation {} for {} in '{}'",
            self.agent_session_id, self.repository, self.session
        );
        if self.archived_previous {
            out.push_str(" (previous conversation archived)");
        }
        out
    }
}

pub fn conversation_add(
    ctx: &CommandContext,
    session: &str,
    path: Option<&Path>,
    repo: Option<String>,
    agent_id: Option<String>,
    branch: Option<String>,
) -> Result<ConversationAdded> {
    let project_path = ctx.project_path(path);
    let repository = match repo {
        Some(repo) => repo,
        None => repository_id(&project_path)?,
    };
    let branch = branch.or_else(|| ctx.branch_at(&project_path));
    let agent_session_id = ctx.agent_id(agent_id);

    let mut store = ctx.store_mut()?;
    let name = store.resolve_name(session)?;
    let archived_previous = store.add_conversation(
        &name,
        &repository,
        &agent_session_id,
        &project_path,
        branch.clone(),
        Utc::now(),
    )?;
    store.save()?;

    Ok(ConversationAdded {
        session: name,
        repository,
        agent_session_id,
        project_path,
        branch,
        archived_previous,
    })
}

/// One repository of a session.
#[derive(Serialize)]
pub struct ConversationView {
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<ConversationContext>,
    pub archived: Vec<ConversationContext>,
}

#[derive(Serialize)]
pub struct ConversationList {
    pub session: String,
    pub conversations: Vec<ConversationView>,
}

impl Output for ConversationList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} conversation(s) in '{}':",
            self.conversations.len(),
            self.session
        )];
        for view in &self.conversations {
            match &view.active {
                Some(active) => lines.push(format!(
                    "  {}: {} [{}] {}",
                    view.repository,
                    active.ai_agent_session_id,
                    active.branch.as_deref().unwrap_or("-"),
                    active.project_path.display()
                )),
                None => lines.push(format!("  {}: (none active)", view.repository)),
            }
            for old in &view.archived {
                lines.push(format!(
                    "    archived {} ({})",
                    old.ai_agent_session_id,
                    old.last_active.format("%Y-%m-%d %H:%M")
                ));
            }
        }
        lines.join("\n")
    }
}

pub fn conversation_list(ctx: &CommandContext, session: Option<&str>) -> Result<ConversationList> {
    let store = ctx.store()?;
    let name = ctx.target_session(&store, session)?;
    let found = store.get(&name)?;
    found.require_conversations()?;
    let conversations = found
        .conversations
        .iter()
        .map(|(repository, conversation)| ConversationView {
            repository: repository.to_string(),
            active: conversation.active().cloned(),
            archived: conversation.archived().to_vec(),
        })
        .collect();
    Ok(ConversationList {
        session: name,
        conversations,
    })
}

#[derive(Serialize)]
pub struct CurrentConversation {
    pub session: String,
    pub repository: String,
    /// "agent_id" or "path"
    pub matched_by: &'static str,
    pub context: ConversationContext,
}

impl Output for CurrentConversation {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "{} / {} ({}, matched by {})",
            self.session,
            self.repository,
            self.context.project_path.display(),
            self.matched_by.replace('_', " ")
        )
    }
}

/// The session and repository the caller is in.
pub fn conversation_current(ctx: &CommandContext) -> Result<CurrentConversation> {
    let store = ctx.store()?;
    let found = store
        .find_active_conversation(ctx.agent_session_id.as_deref(), &ctx.cwd)
        .ok_or_else(|| {
            Error::NotFound(format!("no active conversation for {}", ctx.cwd.display()))
        })?;
    let context = store
        .get(&found.session)?
        .conversations
        .get(&found.repository)
        .and_then(|c| c.active())
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("{}/{}", found.session, found.repository)))?;
    Ok(CurrentConversation {
        matched_by: if found.by_agent_id { "agent_id" } else { "path" },
        session: found.session,
        repository: found.repository,
        context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::session_new;
    use crate::commands::test_support::context;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let api = temp.path().join("api");
        let web = temp.path().join("web");
        std::fs::create_dir_all(&api).unwrap();
        std::fs::create_dir_all(&web).unwrap();
        (temp, data, api)
    }

    #[test]
    fn test_add_second_repository_and_archive() {
        let (temp, data, api) = setup();
        let ctx = context(&data, &api, Some("agent-1"));
        session_new(&ctx, "login", None, None, None, None, None, None).unwrap();

        let web = temp.path().join("web");
        let added = conversation_add(&ctx, "login", Some(&web), None, Some("agent-2".into()), None)
            .unwrap();
        assert_eq!(added.repository, "web");
        assert!(!added.archived_previous);

        let replaced = conversation_add(&ctx, "login", None, None, Some("agent-3".into()), None)
            .unwrap();
        assert_eq!(replaced.repository, "api");
        assert!(replaced.archived_previous);

        let list = conversation_list(&ctx, Some("login")).unwrap();
        let repos: Vec<&str> = list.conversations.iter().map(|c| c.repository.as_str()).collect();
        assert_eq!(repos, vec!["api", "web"]);
        assert_eq!(list.conversations[0].archived.len(), 1);
        assert_eq!(
            list.conversations[0].active.as_ref().unwrap().ai_agent_session_id,
            "agent-3"
        );
    }

    #[test]
    fn test_current_prefers_agent_id() {
        let (temp, data, api) = setup();
        let ctx = context(&data, &api, Some("agent-1"));
        session_new(&ctx, "login", None, None, None, None, None, None).unwrap();

        let elsewhere = context(&data, temp.path(), Some("agent-1"));
        let current = conversation_current(&elsewhere).unwrap();
        assert_eq!(current.session, "login");
        assert_eq!(current.matched_by, "agent_id");

        let by_path = context(&data, &api.join("src"), None);
        assert_eq!(conversation_current(&by_path).unwrap().matched_by, "path");

        let nowhere = context(&data, temp.path(), None);
        assert!(matches!(conversation_current(&nowhere), Err(Error::NotFound(_))));
    }
}
