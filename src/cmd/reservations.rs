//! File reservation commands.

use agentdesk::Orchestrator;
use agentdesk::common::Reservation;
use agentdesk::reservations::ttl_from_secs;
use anyhow::Result;
use console::style;

use super::print_json;

pub fn cmd_reserve(
    orch: &Orchestrator,
    paths: &[String],
    owner: &str,
    reason: &str,
    ttl: Option<i64>,
    json: bool,
) -> Result<()> {
    let ttl = ttl.map(ttl_from_secs).transpose()?;
    if let [path] = paths {
        // A single path fails outright on conflict.
        let granted = orch.reservations().acquire(path, owner, reason, ttl)?;
        if json {
            return print_json(&granted);
        }
        print_reservation(&granted);
        return Ok(());
    }

    let report = orch.reservations().acquire_many(paths, owner, reason, ttl)?;
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
    if !report.conflicts.is_empty() {
        anyhow::bail!("{} of {} paths are reserved by others", report.conflicts.len(), paths.len());
    }
    Ok(())
}

pub fn cmd_release(orch: &Orchestrator, paths: &[String], owner: &str, all: bool, json: bool) -> Result<()> {
    if all {
        let n = orch.reservations().release_owner(owner)?;
        if json {
            return print_json(&n);
        }
        println!("Released {} reservations held by {}", n, owner);
        return Ok(());
    }

    let mut released = Vec::new();
    for path in paths {
        if orch.reservations().release(path, owner)? {
            released.push(path.clone());
        }
    }
    if json {
        return print_json(&released);
    }
    for path in &released {
        println!("{} {}", style("released").green(), path);
    }
    Ok(())
}

pub fn cmd_reservations(orch: &Orchestrator, path: Option<&str>, limit: usize, json: bool) -> Result<()> {
    if let Some(path) = path {
        let holder = orch.reservations().check(path)?;
        if json {
            return print_json(&holder);
        }
        match holder {
            Some(r) => print_reservation(&r),
            None => println!("{} is free", path),
        }
        return Ok(());
    }

    let active = orch.reservations().list(limit)?;
    if json {
        return print_json(&active);
    }
    if active.is_empty() {
        println!("No active reservations.");
    }
    for r in &active {
        print_reservation(r);
    }
    Ok(())
}

fn print_reservation(r: &Reservation) {
    println!(
        "{:<40} {:<16} until {}  {}",
        r.path,
        style(&r.owner).cyan(),
        r.expires_at.format("%Y-%m-%d %H:%M:%S"),
        style(&r.reason).dim()
    );
}
