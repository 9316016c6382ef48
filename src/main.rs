//! Worktrail CLI - track work sessions across repositories and hand them off.

use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use worktrail::cli::{
    Cli, Commands, ConfigCommands, ConversationCommands, SessionCommands, TimeCommands,
};
use worktrail::commands::{self, CommandContext, Output};
use worktrail::config::{self, ConfigOverrides, OutputFormat};
use worktrail::report::ConsoleReporter;

/// Environment variable holding the tracing filter.
const LOG_ENV: &str = "WT_LOG";

fn main() {
    init_tracing();

    let cli = Cli::parse();

    // -H wins; otherwise honour output-format from config.kdl once it is read
    let mut human = cli.human_readable;
    let result = run(cli, &mut human);

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Log to stderr, filtered by `WT_LOG` (default: warnings only).
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn run(cli: Cli, human: &mut bool) -> Result<(), worktrail::Error> {
    let config_path = config::config_path()?;

    // `config set` edits the file directly and must work even when the
    // current file does not resolve
    if let Commands::Config {
        command: ConfigCommands::Set { key, value },
    } = &cli.command
    {
        output(&commands::config_set(&config_path, key, value)?, *human);
        return Ok(());
    }

    let file = config::load_config(&config_path)?;
    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    if let Some(dir) = cli.data_dir {
        overrides = overrides.with_data_dir(dir);
    }
    let resolved = config::resolve_config(&file, &overrides)?;
    *human = resolved.output_format.value == OutputFormat::Human;

    let reporter = if cli.quiet {
        ConsoleReporter::quiet()
    } else {
        ConsoleReporter::new()
    };
    let ctx = CommandContext {
        config: resolved,
        reporter: &reporter,
        cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        agent_session_id: config::agent_session_id().map(|r| r.value),
    };
    debug!(data_dir = %ctx.data_dir().display(), cwd = %ctx.cwd.display(), "starting");

    run_command(cli.command, &ctx, &config_path, *human)
}

fn run_command(
    command: Commands,
    ctx: &CommandContext,
    config_path: &Path,
    human: bool,
) -> Result<(), worktrail::Error> {
    match command {
        Commands::Session { command } => match command {
            SessionCommands::New {
                name,
                goal,
                issue,
                path,
                repo,
                agent_id,
                workspace,
            } => {
                let result = commands::session_new(
                    ctx,
                    &name,
                    goal,
                    issue,
                    path.as_deref(),
                    repo,
                    agent_id,
                    workspace,
                )?;
                output(&result, human);
            }
            SessionCommands::List {
                status,
                workspace,
                running,
            } => {
                let result = commands::session_list(ctx, status.as_deref(), workspace, running)?;
                output(&result, human);
            }
            SessionCommands::Show { id } => {
                output(&commands::session_show(ctx, id.as_deref())?, human);
            }
            SessionCommands::Delete { id } => {
                output(&commands::session_delete(ctx, &id)?, human);
            }
            SessionCommands::Rename { id, new_name } => {
                output(&commands::session_rename(ctx, &id, &new_name)?, human);
            }
            SessionCommands::Status { status, session } => {
                let result = commands::session_status(ctx, &status, session.as_deref())?;
                output(&result, human);
            }
            SessionCommands::Link {
                key,
                title,
                session,
            } => {
                let result =
                    commands::session_link(ctx, &key, title.as_deref(), session.as_deref())?;
                output(&result, human);
            }
            SessionCommands::Note { text, session } => {
                output(&commands::session_note(ctx, &text, session.as_deref())?, human);
            }
            SessionCommands::Pr { pr, repo, session } => {
                output(&commands::session_pr(ctx, &pr, repo, session.as_deref())?, human);
            }
        },
        Commands::Conversation { command } => match command {
            ConversationCommands::Add {
                session,
                path,
                repo,
                agent_id,
                branch,
            } => {
                let result = commands::conversation_add(
                    ctx,
                    &session,
                    path.as_deref(),
                    repo,
                    agent_id,
                    branch,
                )?;
                output(&result, human);
            }
            ConversationCommands::List { session } => {
                output(&commands::conversation_list(ctx, session.as_deref())?, human);
            }
            ConversationCommands::Current => {
                output(&commands::conversation_current(ctx)?, human);
            }
        },
        Commands::Time { command } => match command {
            TimeCommands::Pause { session } => {
                output(&commands::time_pause(ctx, session.as_deref())?, human);
            }
            TimeCommands::Resume { session } => {
                output(&commands::time_resume(ctx, session.as_deref())?, human);
            }
            TimeCommands::Show { session } => {
                output(&commands::time_show(ctx, session.as_deref())?, human);
            }
        },
        Commands::Sync { id } => {
            let result = commands::session_sync(ctx, id.as_deref())?;
            output(&result, human);
            if let Some(e) = result.failure() {
                return Err(e);
            }
        }
        Commands::Export {
            ids,
            all,
            output: path,
            allow_partial,
        } => {
            let result = commands::export(ctx, &ids, all, path.as_deref(), allow_partial)?;
            output(&result, human);
        }
        Commands::Import {
            bundle,
            policy,
            dry_run,
        } => {
            output(&commands::import(ctx, &bundle, policy, dry_run)?, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                output(&commands::config_show(ctx, config_path), human);
            }
            ConfigCommands::Set { key, value } => {
                output(&commands::config_set(config_path, &key, &value)?, human);
            }
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
