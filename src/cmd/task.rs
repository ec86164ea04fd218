//! Task intake and inspection commands.

use agentdesk::Orchestrator;
use agentdesk::common::{NewTask, Task, TaskStatus, TestRun};
use anyhow::{Result, anyhow};
use chrono::Utc;
use console::style;
use serde_json::json;

use super::print_json;
use crate::TaskCommands;

pub fn cmd_task(orch: &Orchestrator, command: TaskCommands, json: bool) -> Result<()> {
    match command {
        TaskCommands::Add {
            title,
            summary,
            criteria,
            story,
            scope,
        } => {
            let task = orch.create_task(NewTask {
                title,
                summary,
                acceptance_criteria: criteria,
                story,
                scope,
            })?;
            if json {
                return print_json(&task);
            }
            println!("Created {} {}", style(&task.id).cyan().bold(), task.title);
        }
        TaskCommands::List { status } => {
            let status = status
                .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let tasks = orch.list_tasks(status)?;
            if json {
                return print_json(&tasks);
            }
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                print_row(task);
            }
        }
        TaskCommands::Show { id } => {
            let task = orch.get_task(&id)?;
            let session = orch.session(&id)?;
            let trail = orch.store().audit_trail(&task.id)?;
            if json {
                return print_json(&json!({
                    "task": task,
                    "session": session,
                    "audit": trail,
                }));
            }
            print_row(&task);
            if !task.summary.is_empty() {
                println!("  {}", task.summary);
            }
            if let Some(agent) = &task.assignee {
                println!("  assignee: {}", agent);
            }
            if !task.scope.is_empty() {
                println!("  scope: {}", task.scope.join(", "));
            }
            for criterion in &task.acceptance_criteria {
                println!("  [ ] {}", criterion);
            }
            if let Some(session) = session {
                println!(
                    "  session {} ({}) in {}",
                    session.id, session.state, session.workdir
                );
            }
            for entry in &trail {
                println!(
                    "  {} {:<8} {}",
                    style(entry.created_at.format("%Y-%m-%d %H:%M")).dim(),
                    entry.kind.as_str(),
                    entry.body
                );
            }
        }
        TaskCommands::Assign { id, agent } => {
            let task = orch.assign_task(&id, &agent)?;
            if json {
                return print_json(&task);
            }
            println!("{} assigned to {}", style(&task.id).cyan().bold(), agent);
        }
    }
    Ok(())
}

pub fn cmd_tests(
    orch: &Orchestrator,
    id: &str,
    passed: u32,
    failed: u32,
    skipped: u32,
    summary: &str,
) -> Result<()> {
    let run = TestRun {
        passed,
        failed,
        skipped,
        summary: summary.to_string(),
        recorded_at: Utc::now(),
    };
    let green = run.is_green();
    orch.record_test_run(id, run)?;
    let verdict = if green {
        style("green").green()
    } else {
        style("red").red()
    };
    println!(
        "Recorded test run for {}: {} passed, {} failed, {} skipped ({})",
        id, passed, failed, skipped, verdict
    );
    Ok(())
}

fn print_row(task: &Task) {
    let status = match task.status {
        TaskStatus::Done => style(task.status.as_str()).green(),
        TaskStatus::Blocked => style(task.status.as_str()).red(),
        TaskStatus::Review => style(task.status.as_str()).yellow(),
        TaskStatus::InProgress => style(task.status.as_str()).cyan(),
        TaskStatus::Todo | TaskStatus::Assigned => style(task.status.as_str()).dim(),
    };
    println!("{:<12} {:<12} {}", task.id.as_str(), status, task.title);
}
