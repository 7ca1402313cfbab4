//! Read-only inspection commands: `status` and `check`.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::config::Config;
use crate::gateway::CollectionProbe;
use crate::models::root_label_of;
use crate::mount::{MountGuard, MountHealth};
use crate::state;

/// Print a summary of the persisted index state without touching the
/// network or the KB roots.
pub fn print_status(config: &Config) -> Result<()> {
    let state = state::load(&config.state.path)?;

    match state.last_run {
        Some(ts) => println!("last run: {}", ts.to_rfc3339()),
        None => println!("last run: never"),
    }
    println!("documents: {}", state.documents.len());

    let mut per_root: BTreeMap<&str, usize> = BTreeMap::new();
    for doc_id in state.documents.keys() {
        *per_root.entry(root_label_of(doc_id)).or_default() += 1;
    }

    let configured = config.root_labels();
    for (label, count) in per_root {
        let marker = if configured.iter().any(|l| l == label) {
            ""
        } else {
            "  (root no longer configured)"
        };
        println!("  {}: {}{}", label, count, marker);
    }

    Ok(())
}

/// Verify the environment is ready for a run: every KB root passes the
/// mount health check and the store answers its status endpoint.
///
/// Exits non-zero (via the returned error) when any root is unhealthy, so
/// this works as a deploy-time probe.
pub async fn check(
    config: &Config,
    guard: &dyn MountGuard,
    probe: &dyn CollectionProbe,
) -> Result<()> {
    let mut unhealthy = 0usize;
    for root in &config.sync.roots {
        match guard.check_root(root) {
            MountHealth::Healthy => {
                println!("ok      {}", root.display());
            }
            MountHealth::Unhealthy(reason) => {
                println!("FAIL    {}: {}", root.display(), reason);
                unhealthy += 1;
            }
        }
    }

    match probe.document_count().await {
        Some(count) => println!("ok      store reachable ({} documents)", count),
        None => println!("warn    store status unavailable at {}", config.api.base_url),
    }

    if unhealthy > 0 {
        anyhow::bail!("{} KB root(s) failed the mount health check", unhealthy);
    }
    Ok(())
}
