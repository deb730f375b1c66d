//! `convoy run`: classify one request and drive it to completion

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;
use convoy_core::{Classification, ClassificationObserver, OwnerId, ShutdownCoordinator};
use serde_json::json;

use super::{coordinator, load};
use crate::engine::ProcessEngine;

/// Prints each classification as it happens
struct OutcomePrinter {
    json: bool,
}

impl ClassificationObserver for OutcomePrinter {
    fn on_classified(&self, owner: &OwnerId, classification: &Classification) {
        if self.json {
            let line = json!({
                "event": "classified",
                "owner_id": owner,
                "outcome": classification.to_string(),
                "classification": classification,
            });
            println!("{line}");
        } else {
            println!("{classification}");
        }
    }
}

pub async fn handle_run(sub_m: &ArgMatches, shutdown: ShutdownCoordinator) -> Result<()> {
    let json = sub_m.get_flag("json");
    let descriptor = sub_m
        .get_one::<String>("descriptor")
        .ok_or_else(|| anyhow::anyhow!("Descriptor is required"))?;
    let branch = sub_m
        .get_one::<String>("branch")
        .ok_or_else(|| anyhow::anyhow!("Branch is required"))?
        .clone();

    let (repo, mut config) = load(sub_m).await?;
    if let Some(policy) = sub_m.get_one::<String>("wait-policy") {
        config.wait_policy = policy.parse()?;
    }

    // The engine runs inside the classified working copy, so resolve the
    // descriptor against the caller's directory first.
    let descriptor = std::fs::canonicalize(descriptor)
        .with_context(|| format!("Descriptor '{descriptor}' not found"))?;
    let engine = ProcessEngine::from_config(&config.engine)?;

    let coordinator = coordinator(&repo, config)?
        .with_shutdown(shutdown)
        .with_observer(Arc::new(OutcomePrinter { json }));

    let report = coordinator
        .classify_and_run(descriptor, branch, &engine)
        .await?;

    if json {
        let line = json!({
            "event": "finished",
            "owner_id": report.owner_id,
            "outcome": report.outcome(),
            "deferrals": report.deferrals,
        });
        println!("{line}");
    }
    Ok(())
}
