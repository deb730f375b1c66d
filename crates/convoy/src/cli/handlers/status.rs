//! `convoy status`

use anyhow::Result;
use clap::ArgMatches;
use convoy_core::status::StatusReport;

use super::{coordinator, load};

pub async fn handle_status(sub_m: &ArgMatches) -> Result<()> {
    let (repo, config) = load(sub_m).await?;
    let status = coordinator(&repo, config)?.status()?;

    if sub_m.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render(&status));
    }
    Ok(())
}

fn stale_tag(stale: bool) -> &'static str {
    if stale {
        " [stale]"
    } else {
        ""
    }
}

fn render(status: &StatusReport) -> String {
    let mut out = format!("Queue: {} waiting\n", status.queue_size);
    for q in &status.queue {
        out.push_str(&format!(
            "  {}. {} {} ({}, pid {}){}\n",
            q.entry.position,
            q.entry.request.branch(),
            q.entry.request.descriptor().display(),
            q.entry.owner_id,
            q.entry.pid,
            stale_tag(q.stale)
        ));
    }

    out.push_str(&format!("Locks: {} held\n", status.locks.len()));
    for lock in &status.locks {
        match &lock.record {
            Some(r) => out.push_str(&format!(
                "  {} by {} (pid {} on {}) since {}{}\n",
                r.branch,
                r.owner_id,
                r.pid,
                r.hostname,
                r.acquired_at.to_rfc3339(),
                stale_tag(lock.stale)
            )),
            None => out.push_str(&format!("  {} (unreadable)\n", lock.path.display())),
        }
    }

    out.push_str(&format!("Instances: {} live\n", status.instances.len()));
    for i in &status.instances {
        out.push_str(&format!(
            "  {} {} -> {} ({}){}\n",
            i.instance.path.display(),
            i.instance.branch,
            i.instance.work_branch,
            i.instance.owner_id,
            stale_tag(i.stale)
        ));
    }
    out
}
