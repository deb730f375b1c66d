//! `convoy check`

use anyhow::Result;
use clap::ArgMatches;
use convoy_core::vcs::{GitCli, VcsVersion, VersionControl};
use serde_json::json;

use super::load;

pub async fn handle_check(sub_m: &ArgMatches) -> Result<()> {
    let (repo, config) = load(sub_m).await?;
    let git = GitCli::new(config.vcs_binary.clone(), repo);
    let version = git.version();
    let supported = version.as_ref().is_ok_and(|v| v.supports_isolation());

    if sub_m.get_flag("json") {
        let output = json!({
            "binary": config.vcs_binary,
            "installed": git.is_installed(),
            "version": version.as_ref().ok().map(ToString::to_string),
            "min_version": VcsVersion::MIN_ISOLATION.to_string(),
            "isolation_supported": supported,
            "error": version.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match &version {
        Ok(v) => println!("{} {v}", config.vcs_binary),
        Err(e) => println!("{}: {e}", config.vcs_binary),
    }
    if supported {
        println!("isolation: available");
    } else {
        println!(
            "isolation: unavailable (needs {} >= {}); conflicting runs will queue",
            config.vcs_binary,
            VcsVersion::MIN_ISOLATION
        );
    }
    Ok(())
}
