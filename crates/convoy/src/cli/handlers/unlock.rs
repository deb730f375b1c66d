//! `convoy unlock`

use anyhow::Result;
use clap::ArgMatches;
use serde_json::json;

use super::{coordinator, load};

pub async fn handle_unlock(sub_m: &ArgMatches) -> Result<()> {
    let branch = sub_m
        .get_one::<String>("branch")
        .ok_or_else(|| anyhow::anyhow!("Branch is required"))?;
    let force = sub_m.get_flag("force");

    let (repo, config) = load(sub_m).await?;
    let released = coordinator(&repo, config)?
        .locks()
        .force_release(branch, force)?;

    if sub_m.get_flag("json") {
        let output = json!({ "branch": branch, "released": released });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if released {
        println!("✓ Unlocked '{branch}'");
    } else {
        println!("No lock held on '{branch}'");
    }
    Ok(())
}
