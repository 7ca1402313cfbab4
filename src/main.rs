//! # KB Sync CLI (`kbsync`)
//!
//! The `kbsync` binary drives one-shot synchronization runs of the KB roots
//! against the remote vector store, plus read-only inspection commands.
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync sync` | Run one full scan → diff → ingest → delete cycle |
//! | `kbsync sync --dry-run` | Show what a run would do without touching anything |
//! | `kbsync status` | Summarize the persisted index state |
//! | `kbsync check` | Verify roots are mounted and the store is reachable |

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kb_sync::config;
use kb_sync::gateway::HttpGateway;
use kb_sync::mount::OsMountGuard;
use kb_sync::status;
use kb_sync::sync::{run_once, SyncDeps};

/// KB Sync — filesystem-to-vector-store synchronization for knowledge bases.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file listing the KB roots, the store API endpoint, and the state file
/// location.
#[derive(Parser)]
#[command(
    name = "kbsync",
    about = "KB Sync — filesystem-to-vector-store synchronization for knowledge bases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./kbsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization cycle.
    ///
    /// Scans every configured KB root, diffs against the persisted state,
    /// ingests new and changed documents, and deletes documents that
    /// vanished from healthy roots. Exactly one run may be active at a
    /// time; a second invocation fails fast.
    Sync {
        /// Scan and diff only — print what would change, touch nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize the persisted index state.
    ///
    /// Prints the last run time and per-root document counts. Reads only
    /// the state file; no network access.
    Status,

    /// Verify the environment is ready for a run.
    ///
    /// Checks every KB root against the mount health gate and probes the
    /// store's status endpoint. Exits non-zero if any root is unhealthy.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync { dry_run } => {
            let gateway = Arc::new(HttpGateway::new(&cfg.api, cfg.admin_key())?);
            let deps = SyncDeps {
                guard: Arc::new(OsMountGuard),
                ingest: gateway.clone(),
                deletion: gateway.clone(),
                reporter: gateway.clone(),
                probe: gateway,
            };

            // First Ctrl-C requests a graceful stop at the next file
            // boundary; the run still persists and reports.
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing in-flight work then stopping");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let report = run_once(&cfg, &deps, cancel, dry_run).await?;
            if !dry_run {
                println!(
                    "sync complete: {} files seen, {} indexed, {} deleted",
                    report.files_seen, report.docs_indexed, report.deleted_docs
                );
                if let Some(err) = report.last_error {
                    println!("last error: {}", err);
                }
            }
        }
        Commands::Status => {
            status::print_status(&cfg)?;
        }
        Commands::Check => {
            let gateway = HttpGateway::new(&cfg.api, cfg.admin_key())?;
            status::check(&cfg, &OsMountGuard, &gateway).await?;
        }
    }

    Ok(())
}
