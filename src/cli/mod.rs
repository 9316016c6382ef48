//! CLI argument definitions for worktrail.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bundle::ImportPolicy;

/// Worktrail - track work sessions across repositories and hand them off.
///
/// Start a session with `wt session new`, then `wt export` it when a
/// teammate should pick it up.
#[derive(Parser, Debug)]
#[command(name = "wt")]
#[command(author, version = env!("WT_VERSION_STRING"), about = "Track AI-assisted work sessions across repositories", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Directory holding the session index
    #[arg(long, global = true, env = "WT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Suppress progress messages (warnings are still shown)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Session management commands
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Agent conversations attached to a session
    Conversation {
        #[command(subcommand)]
        command: ConversationCommands,
    },

    /// Time tracking commands
    Time {
        #[command(subcommand)]
        command: TimeCommands,
    },

    /// Commit, pull and push every repository of a session
    Sync {
        /// Session name or issue key (default: the session you are in)
        id: Option<String>,
    },

    /// Synchronize sessions and write them to a bundle for a teammate
    Export {
        /// Session names or issue keys (default: the session you are in)
        ids: Vec<String>,

        /// Export every session
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Bundle path (default: <name>-<timestamp>.tar.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the bundle even if some repositories failed to synchronize
        #[arg(long)]
        allow_partial: bool,
    },

    /// Import sessions from a bundle
    Import {
        /// Bundle path
        bundle: PathBuf,

        /// What to do with sessions that already exist locally
        #[arg(long, value_enum, default_value_t = ImportPolicy::Merge)]
        policy: ImportPolicy,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Create a session and its first conversation; starts the clock
    New {
        /// Unique session name
        name: String,

        /// What the session is for
        #[arg(short, long)]
        goal: Option<String>,

        /// Issue key to link (e.g. PROJ-123)
        #[arg(short, long)]
        issue: Option<String>,

        /// Working copy (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Repository identifier (default: directory name of the path)
        #[arg(short, long)]
        repo: Option<String>,

        /// Agent conversation id (default: $WT_AGENT_SESSION_ID)
        #[arg(long)]
        agent_id: Option<String>,

        /// Workspace name (default: the configured workspace containing the path)
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// List sessions, most recently active first
    List {
        /// Filter by status (created, in_progress, completed)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by workspace
        #[arg(short, long)]
        workspace: Option<String>,

        /// Only sessions whose clock is running
        #[arg(long)]
        running: bool,
    },

    /// Show a session
    Show {
        /// Session name or issue key (default: the session you are in)
        id: Option<String>,
    },

    /// Delete a session
    Delete {
        /// Session name or issue key
        id: String,
    },

    /// Rename a session
    Rename {
        /// Session name or issue key
        id: String,

        /// New name
        new_name: String,
    },

    /// Set the lifecycle status
    Status {
        /// created, in_progress or completed
        status: String,

        /// Session name or issue key (default: the session you are in)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Link an issue; the goal becomes "<KEY>: <title>"
    Link {
        /// Issue key (e.g. PROJ-123)
        key: String,

        /// Issue title
        #[arg(short, long)]
        title: Option<String>,

        /// Session name or issue key (default: the session you are in)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Attach a note
    Note {
        /// Note text
        text: String,

        /// Session name or issue key (default: the session you are in)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Record a pull/merge request on a repository's active conversation
    Pr {
        /// URL or number
        pr: String,

        /// Repository identifier (default: the conversation you are in)
        #[arg(short, long)]
        repo: Option<String>,

        /// Session name or issue key (default: the session you are in)
        #[arg(short, long)]
        session: Option<String>,
    },
}

/// Conversation subcommands
#[derive(Subcommand, Debug)]
pub enum ConversationCommands {
    /// Start a new conversation for a repository, archiving the active one
    Add {
        /// Session name or issue key
        session: String,

        /// Working copy (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Repository identifier (default: directory name of the path)
        #[arg(short, long)]
        repo: Option<String>,

        /// Agent conversation id (default: $WT_AGENT_SESSION_ID)
        #[arg(long)]
        agent_id: Option<String>,

        /// Branch (default: the branch checked out at the path)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// List a session's conversations
    List {
        /// Session name or issue key (default: the session you are in)
        session: Option<String>,
    },

    /// Show the session and repository you are in
    Current,
}

/// Time tracking subcommands
#[derive(Subcommand, Debug)]
pub enum TimeCommands {
    /// Stop the clock
    Pause {
        /// Session name or issue key (default: the session you are in)
        session: Option<String>,
    },

    /// Start the clock for the configured user
    Resume {
        /// Session name or issue key (default: the session you are in)
        session: Option<String>,
    },

    /// Show tracked time
    Show {
        /// Session name or issue key (default: the session you are in)
        session: Option<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration with the source of each value
    Show,

    /// Set a value in config.kdl (empty value clears it)
    Set {
        /// user, git-timeout, attribution, output-format or workspace.<name>
        key: String,

        /// New value
        value: String,
    },
}
