//! Review commands: summary, diff paging and scope actions.

use agentdesk::Orchestrator;
use agentdesk::review::{Alignment, ReviewDetail};
use anyhow::Result;
use console::style;

use super::print_json;
use crate::ReviewCommands;

pub async fn cmd_review(orch: &Orchestrator, command: ReviewCommands, json: bool) -> Result<()> {
    match command {
        ReviewCommands::Queue => {
            let queue = orch.store().review_queue()?;
            if json {
                return print_json(&queue);
            }
            if queue.is_empty() {
                println!("Review queue is empty.");
            }
            for entry in &queue {
                println!(
                    "{:<12} {:<24} {}",
                    entry.task_id.as_str(),
                    entry.branch,
                    entry.enqueued_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ReviewCommands::Show { id, branch } => {
            let detail = orch.load_review(&id, branch.as_deref()).await?;
            if json {
                return print_json(&detail);
            }
            print_detail(&detail);
        }
        ReviewCommands::Diff {
            id,
            file,
            page,
            branch,
        } => {
            let detail = orch.load_review(&id, branch.as_deref()).await?;
            let mut browser = orch.diff_browser(&detail);
            let mut current = match file {
                Some(file) => browser.select(&file).await?,
                None => browser.page().await?,
            };
            for _ in 0..page {
                current = browser.page_down().await?;
            }
            if json {
                return print_json(&current);
            }
            println!(
                "{} lines {}-{} of {}",
                style(&current.file).bold(),
                current.offset + 1,
                current.offset + current.lines.len(),
                current.total_lines
            );
            for line in &current.lines {
                let styled = if line.starts_with('+') {
                    style(line.as_str()).green()
                } else if line.starts_with('-') {
                    style(line.as_str()).red()
                } else {
                    style(line.as_str())
                };
                println!("{}", styled);
            }
            if current.has_more() {
                println!("{}", style(format!("-- more: --page {} --", page + 1)).dim());
            }
        }
        ReviewCommands::Feedback { id, text } => {
            let entry = orch.capture_feedback(&id, &text)?;
            if json {
                return print_json(&entry);
            }
            println!("Recorded feedback for {}", id);
        }
        ReviewCommands::Accept { id, note } => {
            let detail = orch.load_review(&id, None).await?;
            let entry = orch.accept_scope(&detail, note.as_deref())?;
            if json {
                return print_json(&entry);
            }
            println!("{} out-of-scope files for {}", style("Accepted").green().bold(), id);
        }
        ReviewCommands::Explain { id, text } => {
            let detail = orch.load_review(&id, None).await?;
            let entry = orch.explain_scope(&detail, &text)?;
            if json {
                return print_json(&entry);
            }
            println!("Recorded explanation for {}", id);
        }
        ReviewCommands::Revert { id, files } => {
            let detail = orch.load_review(&id, None).await?;
            let reverted = orch.revert_files(&detail, &files).await?;
            if json {
                return print_json(&reverted);
            }
            for path in &reverted {
                println!("{} {}", style("reverted").yellow(), path);
            }
        }
    }
    Ok(())
}

fn print_detail(detail: &ReviewDetail) {
    let task = &detail.task;
    println!("{} {}", style(&task.id).cyan().bold(), task.title);
    println!(
        "  {} -> {}  (+{} -{} in {} files)",
        detail.branch,
        detail.base_branch,
        detail.total_added(),
        detail.total_deleted(),
        detail.files.len()
    );
    for file in &detail.files {
        if file.binary {
            println!("    {:>6} {:>6}  {}", "bin", "", file.path);
        } else {
            println!("    {:>6} {:>6}  {}", format!("+{}", file.added), format!("-{}", file.deleted), file.path);
        }
    }

    match &detail.tests {
        Some(run) if run.is_green() => println!(
            "  tests: {} ({} passed, {} skipped)",
            style("green").green(),
            run.passed,
            run.skipped
        ),
        Some(run) => println!(
            "  tests: {} ({} passed, {} failed) {}",
            style("red").red(),
            run.passed,
            run.failed,
            run.summary
        ),
        None => println!("  tests: {}", style("none recorded").dim()),
    }

    if !detail.criteria.is_empty() {
        println!("  acceptance criteria:");
        for criterion in &detail.criteria {
            println!("    [ ] {}", criterion);
        }
    }
    if detail.story_drift {
        println!("  {} story changed since work started", style("!").yellow().bold());
    }

    let alignment = match detail.alignment {
        Alignment::Mvp => style(detail.alignment.as_str()).green(),
        Alignment::Out => style(detail.alignment.as_str()).red(),
        Alignment::Unknown => style(detail.alignment.as_str()).dim(),
    };
    println!("  alignment: {}", alignment);
    for path in &detail.out_of_scope {
        println!("    outside scope: {}", path);
    }
    if detail.alignment == Alignment::Out {
        println!("  resolve with `agentdesk review accept|explain|revert {}`", task.id);
    }
}
