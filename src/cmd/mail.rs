//! Mailbox commands.

use agentdesk::Orchestrator;
use agentdesk::common::{Importance, NewMessage};
use agentdesk::mailbox::{InboxScope, filter_scope, is_urgent};
use anyhow::{Result, anyhow};
use console::style;

use super::print_json;

#[allow(clippy::too_many_arguments)]
pub fn cmd_send(
    orch: &Orchestrator,
    from: &str,
    to: &[String],
    cc: &[String],
    subject: &str,
    body: &str,
    importance: &str,
    json: bool,
) -> Result<()> {
    let importance: Importance = importance.parse().map_err(|e: String| anyhow!(e))?;
    let message = orch.mailbox().send(NewMessage {
        sender: from.to_string(),
        to: to.to_vec(),
        cc: cc.to_vec(),
        subject: subject.to_string(),
        body: body.to_string(),
        importance,
    })?;
    if json {
        return print_json(&message);
    }
    println!(
        "Sent {} to {}",
        style(&message.id).dim(),
        message.recipients().join(", ")
    );
    Ok(())
}

pub fn cmd_inbox(
    orch: &Orchestrator,
    name: &str,
    urgent: bool,
    scope: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let scope: InboxScope = scope.parse().map_err(|e: String| anyhow!(e))?;
    let entries = filter_scope(orch.mailbox().inbox(name, limit, urgent)?, scope, name);
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No messages for {}.", name);
        return Ok(());
    }
    let unread = orch.mailbox().unread_count(name)?;
    println!("{} ({} unread)", style(name).bold(), unread);
    for entry in &entries {
        let message = &entry.message;
        let marker = if entry.delivery.read_at.is_none() { "*" } else { " " };
        let subject = if is_urgent(message) {
            style(format!("[urgent] {}", message.subject)).red().bold()
        } else {
            style(message.subject.clone())
        };
        println!(
            "{} {}  {:<12} {}  {}",
            marker,
            style(message.created_at.format("%Y-%m-%d %H:%M")).dim(),
            message.sender,
            subject,
            style(&message.id).dim()
        );
        if !message.body.is_empty() {
            for line in message.body.lines() {
                println!("      {}", line);
            }
        }
    }
    Ok(())
}

pub fn cmd_read(orch: &Orchestrator, message_id: &str, recipient: &str) -> Result<()> {
    orch.mailbox().mark_read(message_id, recipient)?;
    println!("Marked {} read for {}", message_id, recipient);
    Ok(())
}
