//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module         | Commands handled                                              |
//! |----------------|---------------------------------------------------------------|
//! | `project`      | `Init`, `Config`                                              |
//! | `task`         | `Task`, `Tests`                                               |
//! | `lifecycle`    | `Start`, `Stop`, `Resume`, `Submit`, `Approve`, `Reject`,     |
//! |                | `Refresh`, `Logs`, `Sync`, `Cleanup`                          |
//! | `review`       | `Review`                                                      |
//! | `reservations` | `Reserve`, `Release`, `Reservations`                          |
//! | `mail`         | `Send`, `Inbox`, `Read`                                       |

pub mod lifecycle;
pub mod mail;
pub mod project;
pub mod reservations;
pub mod review;
pub mod task;

pub use lifecycle::{
    cmd_approve, cmd_cleanup, cmd_logs, cmd_refresh, cmd_reject, cmd_resume, cmd_start, cmd_stop,
    cmd_submit, cmd_sync,
};
pub use mail::{cmd_inbox, cmd_read, cmd_send};
pub use project::{cmd_config, cmd_init};
pub use reservations::{cmd_release, cmd_reservations, cmd_reserve};
pub use review::cmd_review;
pub use task::{cmd_task, cmd_tests};

use std::path::Path;

use agentdesk::Orchestrator;
use agentdesk::config::DeskConfig;
use anyhow::{Result, bail};
use console::style;
use serde::Serialize;

use crate::Cli;

/// Resolve configuration and open the project's orchestrator.
pub fn open(cli: &Cli, project_dir: &Path) -> Result<Orchestrator> {
    let config = DeskConfig::with_cli_args(
        project_dir.to_path_buf(),
        cli.verbose,
        cli.base_branch.clone(),
        cli.agent_cmd.clone(),
    )?;
    if !config.desk_dir.is_dir() {
        bail!(
            "No agentdesk project at {}. Run `agentdesk init` first.",
            config.project_dir.display()
        );
    }
    for warning in config.validate() {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }
    Orchestrator::open(&config)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
