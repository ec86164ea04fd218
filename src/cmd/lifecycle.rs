//! Task lifecycle commands: start through approve or reject.

use std::io::Write;

use agentdesk::Orchestrator;
use agentdesk::reservations::ttl_from_secs;
use anyhow::Result;
use console::style;

use super::print_json;

pub async fn cmd_start(orch: &Orchestrator, id: &str, json: bool) -> Result<()> {
    let session = orch.start_task(id).await?;
    if json {
        return print_json(&session);
    }
    println!(
        "{} {} in {}",
        style("Started").green().bold(),
        id,
        session.workdir
    );
    println!("  session: {} (tmux attach -t {})", session.id, session.id);
    println!("  log:     {}", session.log_path);
    Ok(())
}

pub async fn cmd_stop(orch: &Orchestrator, id: &str, json: bool) -> Result<()> {
    let task = orch.stop_task(id).await?;
    if json {
        return print_json(&task);
    }
    println!("{} {} ({})", style("Stopped").yellow().bold(), id, task.status);
    Ok(())
}

pub async fn cmd_resume(orch: &Orchestrator, id: &str, json: bool) -> Result<()> {
    let session = orch.resume_task(id).await?;
    if json {
        return print_json(&session);
    }
    println!("{} {} ({})", style("Resumed").green().bold(), id, session.id);
    Ok(())
}

pub fn cmd_submit(orch: &Orchestrator, id: &str, json: bool) -> Result<()> {
    let entry = orch.submit_for_review(id)?;
    if json {
        return print_json(&entry);
    }
    println!("{} {} ({})", style("Submitted").cyan().bold(), id, entry.branch);
    Ok(())
}

pub async fn cmd_approve(orch: &Orchestrator, id: &str, branch: Option<&str>, json: bool) -> Result<()> {
    let task = orch.approve_task(id, branch).await?;
    if json {
        return print_json(&task);
    }
    println!(
        "{} {} into {}",
        style("Merged").green().bold(),
        id,
        orch.settings().base_branch
    );
    Ok(())
}

pub async fn cmd_reject(orch: &Orchestrator, id: &str, feedback: &str, json: bool) -> Result<()> {
    let task = orch.reject_task(id, feedback).await?;
    if json {
        return print_json(&task);
    }
    println!("{} {} (back to {})", style("Rejected").red().bold(), id, task.status);
    Ok(())
}

pub async fn cmd_refresh(orch: &Orchestrator, id: Option<&str>, json: bool) -> Result<()> {
    let sessions = match id {
        Some(id) => orch.refresh(id).await?.into_iter().collect(),
        None => orch.refresh_all().await?,
    };
    if json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No sessions.");
    }
    for session in &sessions {
        println!("{:<12} {:<10} {}", session.task_id.as_str(), session.state, session.id);
    }
    Ok(())
}

pub async fn cmd_logs(orch: &Orchestrator, id: &str) -> Result<()> {
    let text = orch.poll_output(id).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

pub async fn cmd_sync(orch: &Orchestrator, id: &str, ttl: Option<i64>, json: bool) -> Result<()> {
    let report = orch
        .sync_reservations(id, ttl.map(ttl_from_secs).transpose()?)
        .await?;
    if json {
        return print_json(&report);
    }
    for path in &report.granted {
        println!("{} {}", style("reserved").green(), path);
    }
    for held in &report.conflicts {
        println!(
            "{} {} (held by {} until {})",
            style("conflict").red(),
            held.path,
            held.holder,
            held.expires_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn cmd_cleanup(orch: &Orchestrator, id: &str) -> Result<()> {
    orch.cleanup_task(id).await?;
    println!("Removed workspace for {}", id);
    Ok(())
}
