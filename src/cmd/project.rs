//! Project initialization and configuration commands.

use std::path::Path;

use agentdesk::config::{DESK_DIR, DeskConfig, init_project};
use anyhow::Result;
use console::style;

use crate::{Cli, ConfigCommands};

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let (config_path, created) = init_project(project_dir)?;
    if created {
        println!("Initialized agentdesk project at {}", project_dir.display());
        println!();
        println!("Created:");
        println!("  {}/", DESK_DIR);
        println!("  └── agentdesk.toml   # settings (see `agentdesk config show`)");
        println!();
        println!("Next steps:");
        println!("  1. Run `agentdesk task add \"<title>\" --scope 'src/**'` to create a task");
        println!("  2. Run `agentdesk start <id>` to launch a worker on it");
    } else {
        println!(
            "agentdesk project already initialized ({} exists)",
            config_path.display()
        );
    }
    Ok(())
}

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = DeskConfig::with_cli_args(
        project_dir.to_path_buf(),
        cli.verbose,
        cli.base_branch.clone(),
        cli.agent_cmd.clone(),
    )?;

    match command {
        None | Some(ConfigCommands::Show) => {
            if cli.json {
                return super::print_json(&config.toml);
            }
            let path = config.config_path();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No agentdesk.toml found at {}, using defaults", path.display());
            }
            println!();
            println!("{}", toml::to_string_pretty(&config.toml)?);
            println!("Effective values (with env/CLI overrides):");
            println!("  base_branch = \"{}\"", config.base_branch());
            println!("  agent_cmd = \"{}\"", config.agent_cmd());
            println!("  workspaces_root = \"{}\"", config.workspaces_root().display());
            println!("  log_dir = \"{}\"", config.log_dir().display());
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{} configuration is valid", style("ok").green().bold());
            } else {
                for warning in &warnings {
                    println!("{} {}", style("warning:").yellow().bold(), warning);
                }
            }
        }
    }
    Ok(())
}
