//! Sync orchestration.
//!
//! Drives one full run through its phases: scan → diff → sync → delete →
//! persist → report. One run holds the run lock for its whole duration;
//! a trigger arriving while a run is active fails fast instead of running
//! concurrently.
//!
//! Per-document work in the sync phase is independent and runs on a
//! bounded worker pool. The only ordering that matters is within one
//! document — read → hash → extract → chunk → ingest → state update — and
//! each document appears at most once in the change set, so no two ingests
//! for the same id are ever in flight together.
//!
//! Failure discipline: a failed extraction or exhausted-retry ingest skips
//! that one file and the run continues. Only two conditions abort a run:
//! a corrupt state file (diffing would be meaningless) and a run lock held
//! by another process. The deletion phase is additionally gated per root
//! on mount health, so an unmounted share is never mistaken for a mass
//! delete.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::chunk::build_chunks;
use crate::config::{ChunkingConfig, Config};
use crate::detect::{detect_changes, ChangeSet, ScannedFile};
use crate::error::SyncError;
use crate::extract;
use crate::gateway::{
    CollectionProbe, DeletionGateway, IngestGateway, IngestRequest, StatusReporter,
};
use crate::hash::hash_file;
use crate::models::{root_label_of, DocumentRecord, IndexState, RunReport};
use crate::mount::{MountGuard, MountHealth};
use crate::scanner::scan_roots;
use crate::state::{self, RunLock};

/// The injected collaborators one run needs.
pub struct SyncDeps {
    pub guard: Arc<dyn MountGuard>,
    pub ingest: Arc<dyn IngestGateway>,
    pub deletion: Arc<dyn DeletionGateway>,
    pub reporter: Arc<dyn StatusReporter>,
    pub probe: Arc<dyn CollectionProbe>,
}

/// Execute one complete sync run.
///
/// Returns the run's report; also hands it to the status reporter, whose
/// failure is logged but never fails the run. `cancel` is checked between
/// per-file units of work; a cancelled run still persists whatever the
/// remote side confirmed and still reports.
pub async fn run_once(
    config: &Config,
    deps: &SyncDeps,
    cancel: Arc<AtomicBool>,
    dry_run: bool,
) -> Result<RunReport> {
    let _lock = RunLock::acquire(&config.state.path)
        .context("cannot start sync run")?;

    let configured_labels = config.root_labels();
    let mut last_error: Option<String> = None;

    // Probe every configured root up front; verdicts gate the deletion
    // phase later but are logged now for operator visibility.
    let mut health: BTreeMap<String, MountHealth> = BTreeMap::new();
    for root in &config.sync.roots {
        let label = crate::config::root_label(root);
        let verdict = deps.guard.check_root(root);
        if let MountHealth::Unhealthy(reason) = &verdict {
            warn!(root = %root.display(), reason, "KB root failed mount health check");
        }
        health.insert(label, verdict);
    }

    info!(roots = configured_labels.len(), "scanning KB roots");
    let files = scan_roots(&config.sync)?;
    let files_seen = files.len() as u64;

    // State corruption must surface before any network call; all diffing
    // depends on it.
    let mut working: IndexState =
        state::load(&config.state.path).context("cannot load index state")?;

    // A file that was observed but yields no fingerprint (read error,
    // cancellation) stays "seen": it must neither sync nor look deleted.
    let mut scanned = Vec::with_capacity(files.len());
    let mut unhashed: Vec<String> = Vec::new();
    for file in files {
        if cancel.load(Ordering::Relaxed) {
            unhashed.push(file.document_id());
            continue;
        }
        match hash_file(&file.path) {
            Ok(content_hash) => scanned.push(ScannedFile { file, content_hash }),
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "cannot hash file; skipping");
                last_error = Some(format!("{}: {}", file.path.display(), e));
                unhashed.push(file.document_id());
            }
        }
    }

    // An emptied remote collection alongside a populated KB means the
    // store was rebuilt; drop local state so everything re-ingests.
    if !dry_run && !scanned.is_empty() && !working.documents.is_empty() {
        if deps.probe.document_count().await == Some(0) {
            warn!("remote collection is empty but KB has files; resetting state for full reindex");
            working.documents.clear();
        }
    }

    let change_set = detect_changes(scanned, &unhashed, &working, &configured_labels);
    info!(
        new = change_set.new.len(),
        changed = change_set.changed.len(),
        unchanged = change_set.unchanged.len(),
        deleted = change_set.deleted.len(),
        orphaned = change_set.orphaned.len(),
        "change detection complete"
    );

    if dry_run {
        print_dry_run(&change_set, files_seen);
        return Ok(RunReport {
            last_run: working.last_run,
            last_error,
            kb_roots: root_paths(config),
            files_seen,
            docs_indexed: 0,
            deleted_docs: 0,
        });
    }

    let docs_indexed = sync_documents(
        config,
        deps,
        &change_set,
        &mut working,
        &mut last_error,
        &cancel,
    )
    .await;

    let deleted_docs = delete_documents(
        config,
        deps,
        &change_set,
        &health,
        &mut working,
        &mut last_error,
        &cancel,
    )
    .await;

    let now = Utc::now();
    working.last_run = Some(now);
    state::commit(&config.state.path, &working).context("cannot persist index state")?;

    let report = RunReport {
        last_run: Some(now),
        last_error,
        kb_roots: root_paths(config),
        files_seen,
        docs_indexed,
        deleted_docs,
    };

    if let Err(e) = deps.reporter.report(&report).await {
        warn!(error = %e, "status report failed; run result is unaffected");
    }

    info!(
        files_seen = report.files_seen,
        docs_indexed = report.docs_indexed,
        deleted_docs = report.deleted_docs,
        "sync run complete"
    );
    Ok(report)
}

/// Ingest every new or changed document on a bounded worker pool.
///
/// The working state only takes a document's new record after the store
/// acknowledged the chunk set, so an aborted run persists nothing
/// unconfirmed.
async fn sync_documents(
    config: &Config,
    deps: &SyncDeps,
    change_set: &ChangeSet,
    working: &mut IndexState,
    last_error: &mut Option<String>,
    cancel: &Arc<AtomicBool>,
) -> u64 {
    let semaphore = Arc::new(Semaphore::new(config.sync.workers));
    let mut join_set = JoinSet::new();

    for item in change_set.to_sync() {
        if cancel.load(Ordering::Relaxed) {
            info!("cancellation requested; not dispatching further documents");
            break;
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let item = item.clone();
        let chunking = config.chunking.clone();
        let gateway = Arc::clone(&deps.ingest);
        let prior_version = working
            .documents
            .get(&item.file.document_id())
            .map(|r| r.version);

        join_set.spawn(async move {
            let _permit = permit;
            process_document(item, chunking, gateway, prior_version).await
        });
    }

    let mut docs_indexed = 0u64;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(Some((doc_id, record)))) => {
                working.documents.insert(doc_id, record);
                docs_indexed += 1;
            }
            Ok(Ok(None)) => {} // empty document, skipped
            Ok(Err((doc_id, err))) => {
                warn!(doc_id, error = %err, "document sync failed; continuing");
                *last_error = Some(format!("{}: {}", doc_id, err));
            }
            Err(join_err) => {
                warn!(error = %join_err, "document task panicked");
                *last_error = Some(format!("document task failed: {}", join_err));
            }
        }
    }

    docs_indexed
}

/// Extract, chunk, and ingest one document.
///
/// `Ok(None)` means the file produced no indexable text and was skipped.
async fn process_document(
    item: ScannedFile,
    chunking: ChunkingConfig,
    gateway: Arc<dyn IngestGateway>,
    prior_version: Option<u64>,
) -> Result<Option<(String, DocumentRecord)>, (String, SyncError)> {
    let doc_id = item.file.document_id();

    let path = item.file.path.clone();
    let file_type = item.file.file_type.clone();
    let extracted = tokio::task::spawn_blocking(move || extract::extract_text(&path, &file_type))
        .await
        .map_err(|e| {
            (
                doc_id.clone(),
                SyncError::Extraction {
                    path: item.file.path.display().to_string(),
                    reason: e.to_string(),
                },
            )
        })?;

    let text = extracted.map_err(|e| {
        (
            doc_id.clone(),
            SyncError::Extraction {
                path: item.file.path.display().to_string(),
                reason: e.to_string(),
            },
        )
    })?;

    let chunks = build_chunks(&item.file, &text, &chunking);
    if chunks.is_empty() {
        info!(doc_id, "no content to index; skipping");
        return Ok(None);
    }
    let chunk_count = chunks.len();

    info!(doc_id, chunks = chunk_count, "ingesting document");
    let response = gateway
        .ingest(IngestRequest {
            document_id: doc_id.clone(),
            doc_hash: item.content_hash.clone(),
            last_modified: item.file.modified,
            chunks,
        })
        .await
        .map_err(|e| (doc_id.clone(), e))?;

    // The remote is the arbiter of version; an unchanged no-op keeps the
    // prior version.
    let version = response.version.or(prior_version).unwrap_or(1);

    let record = DocumentRecord {
        content_hash: item.content_hash,
        last_modified: item.file.modified,
        version,
        chunk_count,
    };
    Ok(Some((doc_id, record)))
}

/// Remove deleted documents from the store, gated on mount health.
///
/// Orphans (whole root dropped from configuration) are only eligible under
/// the explicit override, and bypass the health gate since their root no
/// longer exists in configuration to probe.
async fn delete_documents(
    config: &Config,
    deps: &SyncDeps,
    change_set: &ChangeSet,
    health: &BTreeMap<String, MountHealth>,
    working: &mut IndexState,
    last_error: &mut Option<String>,
    cancel: &Arc<AtomicBool>,
) -> u64 {
    let mut deletable: Vec<String> = Vec::new();

    for doc_id in &change_set.deleted {
        let label = root_label_of(doc_id);
        match health.get(label) {
            Some(MountHealth::Healthy) => deletable.push(doc_id.clone()),
            Some(MountHealth::Unhealthy(reason)) => {
                let err = SyncError::MountUnhealthy {
                    root: label.to_string(),
                    reason: reason.clone(),
                };
                warn!(doc_id, error = %err, "skipping deletion");
                *last_error = Some(err.to_string());
            }
            None => {
                warn!(doc_id, root = label, "no health verdict for root; skipping deletion");
            }
        }
    }

    if change_set.orphaned.is_empty() {
        // nothing to decide
    } else if config.sync.allow_root_removal {
        warn!(
            count = change_set.orphaned.len(),
            "root removal override enabled; deleting orphaned documents"
        );
        deletable.extend(change_set.orphaned.iter().cloned());
    } else {
        warn!(
            count = change_set.orphaned.len(),
            "documents belong to roots removed from configuration; retained \
             (set sync.allow_root_removal to delete them)"
        );
    }

    let mut deleted_docs = 0u64;
    for doc_id in deletable {
        if cancel.load(Ordering::Relaxed) {
            info!("cancellation requested; stopping deletion pass");
            break;
        }
        match deps.deletion.delete(&doc_id).await {
            Ok(_) => {
                working.documents.remove(&doc_id);
                deleted_docs += 1;
                info!(doc_id, "deleted document from store");
            }
            Err(e) => {
                warn!(doc_id, error = %e, "deletion failed; document retained in state");
                *last_error = Some(format!("{}: {}", doc_id, e));
            }
        }
    }

    deleted_docs
}

fn root_paths(config: &Config) -> Vec<String> {
    config
        .sync
        .roots
        .iter()
        .map(|p| p.display().to_string())
        .collect()
}

fn print_dry_run(change_set: &ChangeSet, files_seen: u64) {
    println!("sync (dry-run)");
    println!("  files seen: {}", files_seen);
    println!("  would ingest (new): {}", change_set.new.len());
    println!("  would ingest (changed): {}", change_set.changed.len());
    println!("  unchanged: {}", change_set.unchanged.len());
    println!("  would delete: {}", change_set.deleted.len());
    println!("  orphaned (retained): {}", change_set.orphaned.len());
}
