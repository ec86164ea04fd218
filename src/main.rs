use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

/// Environment variable holding the log filter for stderr output.
const LOG_ENV: &str = "AGENTDESK_LOG";

#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(version, about = "Task orchestration for autonomous coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Branch that task branches are created from and merged into. Overrides agentdesk.toml.
    #[arg(long, global = true, env = "AGENTDESK_BASE_BRANCH")]
    pub base_branch: Option<String>,

    /// Command typed into each new worker session. Overrides agentdesk.toml.
    #[arg(long, global = true, env = "AGENTDESK_AGENT_CMD")]
    pub agent_cmd: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize agentdesk in the project directory
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Create, list and inspect tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Provision a workspace and launch the worker session
    Start { id: String },
    /// Stop the worker session and mark the task blocked
    Stop { id: String },
    /// Restart a blocked task
    Resume { id: String },
    /// Submit an in-progress task for review
    Submit { id: String },
    /// Merge a reviewed task into the base branch
    Approve {
        id: String,
        /// Branch to merge (defaults to feature/<id>)
        #[arg(long)]
        branch: Option<String>,
    },
    /// Send a reviewed task back to todo
    Reject {
        id: String,
        #[arg(long)]
        feedback: String,
    },
    /// Inspect a task under review and act on out-of-scope changes
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Mark sessions whose worker has exited as done
    Refresh {
        /// Task to refresh (defaults to every in-progress task)
        id: Option<String>,
    },
    /// Print worker output written since the last call
    Logs { id: String },
    /// Reserve every file the task workspace has changed
    Sync {
        id: String,
        /// Reservation lifetime in seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Remove the workspace of a done task
    Cleanup { id: String },
    /// Reserve files for an owner
    Reserve {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        reason: String,
        /// Reservation lifetime in seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Release reservations held by an owner
    Release {
        paths: Vec<String>,
        #[arg(long)]
        owner: String,
        /// Release every reservation the owner holds
        #[arg(long, conflicts_with = "paths")]
        all: bool,
    },
    /// List active reservations, or show who holds one path
    Reservations {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Send a message to other agents
    Send {
        #[arg(long)]
        from: String,
        #[arg(long, required = true)]
        to: Vec<String>,
        #[arg(long)]
        cc: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        /// low, normal, high or urgent
        #[arg(long, default_value = "normal")]
        importance: String,
    },
    /// Show an agent's inbox
    Inbox {
        name: String,
        /// Only urgent messages
        #[arg(long)]
        urgent: bool,
        /// all, to_me or mentions
        #[arg(long, default_value = "all")]
        scope: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Mark a message read
    Read {
        message_id: String,
        /// Recipient marking the message
        #[arg(long = "as")]
        recipient: String,
    },
    /// Record a test run for a task
    Tests {
        id: String,
        #[arg(long)]
        passed: u32,
        #[arg(long, default_value = "0")]
        failed: u32,
        #[arg(long, default_value = "0")]
        skipped: u32,
        #[arg(long, default_value = "")]
        summary: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// Create a task in todo
    Add {
        title: String,
        #[arg(long, default_value = "")]
        summary: String,
        /// Acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
        #[arg(long, default_value = "")]
        story: String,
        /// Declared scope glob, e.g. "src/auth/**" (repeatable)
        #[arg(long)]
        scope: Vec<String>,
    },
    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task with its session and audit trail
    Show { id: String },
    /// Assign a todo task to an agent
    Assign { id: String, agent: String },
}

#[derive(Subcommand, Clone)]
pub enum ReviewCommands {
    /// List tasks waiting for review
    Queue,
    /// Show the review summary for a task
    Show {
        id: String,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Page through a file's diff
    Diff {
        id: String,
        /// File to show (defaults to the first changed file)
        #[arg(long)]
        file: Option<String>,
        /// Zero-based page number
        #[arg(long, default_value = "0")]
        page: usize,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Record a reviewer note
    Feedback { id: String, text: String },
    /// Accept out-of-scope files as they are
    Accept {
        id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Explain why out-of-scope files belong in the change
    Explain { id: String, text: String },
    /// Restore out-of-scope files to the base branch (all of them when none are named)
    Revert { id: String, files: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _guard = init_logging(cli.verbose, &project_dir);

    let json = cli.json;
    let open = || cmd::open(&cli, &project_dir);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
        Commands::Task { command } => cmd::cmd_task(&open()?, command.clone(), json)?,
        Commands::Start { id } => cmd::cmd_start(&open()?, id, json).await?,
        Commands::Stop { id } => cmd::cmd_stop(&open()?, id, json).await?,
        Commands::Resume { id } => cmd::cmd_resume(&open()?, id, json).await?,
        Commands::Submit { id } => cmd::cmd_submit(&open()?, id, json)?,
        Commands::Approve { id, branch } => {
            cmd::cmd_approve(&open()?, id, branch.as_deref(), json).await?
        }
        Commands::Reject { id, feedback } => cmd::cmd_reject(&open()?, id, feedback, json).await?,
        Commands::Review { command } => cmd::cmd_review(&open()?, command.clone(), json).await?,
        Commands::Refresh { id } => cmd::cmd_refresh(&open()?, id.as_deref(), json).await?,
        Commands::Logs { id } => cmd::cmd_logs(&open()?, id).await?,
        Commands::Sync { id, ttl } => cmd::cmd_sync(&open()?, id, *ttl, json).await?,
        Commands::Cleanup { id } => cmd::cmd_cleanup(&open()?, id).await?,
        Commands::Reserve {
            paths,
            owner,
            reason,
            ttl,
        } => cmd::cmd_reserve(&open()?, paths, owner, reason, *ttl, json)?,
        Commands::Release { paths, owner, all } => {
            cmd::cmd_release(&open()?, paths, owner, *all, json)?
        }
        Commands::Reservations { path, limit } => {
            cmd::cmd_reservations(&open()?, path.as_deref(), *limit, json)?
        }
        Commands::Send {
            from,
            to,
            cc,
            subject,
            body,
            importance,
        } => cmd::cmd_send(&open()?, from, to, cc, subject, body, importance, json)?,
        Commands::Inbox {
            name,
            urgent,
            scope,
            limit,
        } => cmd::cmd_inbox(&open()?, name, *urgent, scope, *limit, json)?,
        Commands::Read {
            message_id,
            recipient,
        } => cmd::cmd_read(&open()?, message_id, recipient)?,
        Commands::Tests {
            id,
            passed,
            failed,
            skipped,
            summary,
        } => cmd::cmd_tests(&open()?, id, *passed, *failed, *skipped, summary)?,
    }

    Ok(())
}

/// Stderr gets `AGENTDESK_LOG` (default warnings only, `--verbose` for
/// debug). Once the project is initialised, info and above also go to a
/// daily file under `.agentdesk/trace`, away from the session logs.
fn init_logging(verbose: bool, project_dir: &Path) -> Option<WorkerGuard> {
    let default = if verbose { "agentdesk=debug" } else { "agentdesk=warn" };
    let stderr_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let desk_dir = project_dir.join(agentdesk::config::DESK_DIR);
    let (file_layer, guard) = if desk_dir.is_dir() {
        let appender = tracing_appender::rolling::daily(
            desk_dir.join(agentdesk::config::TRACE_DIR),
            "agentdesk.log",
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(EnvFilter::new("agentdesk=info"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_filter(stderr_filter),
        )
        .with(file_layer)
        .init();
    guard
}
