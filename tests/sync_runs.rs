//! End-to-end sync runs against an in-memory fake of the vector store.
//!
//! These tests exercise the full orchestrator — scan, hash, diff, extract,
//! chunk, ingest, delete, persist, report — over real files in temp
//! directories, with the HTTP boundary replaced by recording fakes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use kb_sync::config::{ApiConfig, ChunkingConfig, Config, StateConfig, SyncConfig};
use kb_sync::error::SyncError;
use kb_sync::gateway::{
    CollectionProbe, DeleteResponse, DeletionGateway, IngestGateway, IngestRequest,
    IngestResponse, StatusReporter,
};
use kb_sync::models::RunReport;
use kb_sync::mount::{MountGuard, MountHealth};
use kb_sync::state::{self, RunLock};
use kb_sync::sync::{run_once, SyncDeps};

/// Recording fake of the store's whole API surface.
#[derive(Default)]
struct FakeStore {
    ingests: Mutex<Vec<IngestRequest>>,
    deletes: Mutex<Vec<String>>,
    reports: Mutex<Vec<RunReport>>,
    versions: Mutex<HashMap<String, u64>>,
    fail_ingest_for: Mutex<HashSet<String>>,
    document_count: Mutex<Option<u64>>,
}

impl FakeStore {
    fn ingested_ids(&self) -> Vec<String> {
        self.ingests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.document_id.clone())
            .collect()
    }

    fn ingest_count(&self) -> usize {
        self.ingests.lock().unwrap().len()
    }

    fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl IngestGateway for FakeStore {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, SyncError> {
        if self
            .fail_ingest_for
            .lock()
            .unwrap()
            .contains(&request.document_id)
        {
            return Err(SyncError::PermanentRequest {
                status: 422,
                body: "rejected".into(),
            });
        }

        let mut versions = self.versions.lock().unwrap();
        let version = versions
            .entry(request.document_id.clone())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        let response = IngestResponse {
            status: "ok".into(),
            ingested_count: request.chunks.len() as u64,
            document_id: request.document_id.clone(),
            version: Some(*version),
            doc_hash: Some(request.doc_hash.clone()),
        };
        drop(versions);

        self.ingests.lock().unwrap().push(request);
        Ok(response)
    }
}

#[async_trait]
impl DeletionGateway for FakeStore {
    async fn delete(&self, document_id: &str) -> Result<DeleteResponse, SyncError> {
        self.deletes.lock().unwrap().push(document_id.to_string());
        Ok(DeleteResponse {
            status: "deleted".into(),
            deleted_document_id: document_id.to_string(),
        })
    }
}

#[async_trait]
impl StatusReporter for FakeStore {
    async fn report(&self, report: &RunReport) -> Result<(), SyncError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl CollectionProbe for FakeStore {
    async fn document_count(&self) -> Option<u64> {
        *self.document_count.lock().unwrap()
    }
}

/// Guard returning a fixed verdict for every root.
struct FixedGuard(MountHealth);

impl MountGuard for FixedGuard {
    fn check_root(&self, _root: &Path) -> MountHealth {
        self.0.clone()
    }
}

fn test_config(state_dir: &Path, roots: Vec<PathBuf>) -> Config {
    Config {
        state: StateConfig {
            path: state_dir.join("index_state.json"),
        },
        api: ApiConfig {
            base_url: "http://unused".into(),
            timeout_secs: 5,
            max_retries: 0,
            backoff_ms: 1,
        },
        chunking: ChunkingConfig::default(),
        sync: SyncConfig {
            roots,
            allow_root_removal: false,
            workers: 2,
            hidden_prefix: ".".into(),
            exclude_globs: Vec::new(),
        },
    }
}

fn deps_with(store: &Arc<FakeStore>, health: MountHealth) -> SyncDeps {
    SyncDeps {
        guard: Arc::new(FixedGuard(health)),
        ingest: store.clone(),
        deletion: store.clone(),
        reporter: store.clone(),
        probe: store.clone(),
    }
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn write_kb(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

#[tokio::test]
async fn test_first_run_ingests_everything() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("sub/b.txt", "bravo")]);
    let config = test_config(tmp.path(), vec![root]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    assert_eq!(report.files_seen, 2);
    assert_eq!(report.docs_indexed, 2);
    assert_eq!(report.deleted_docs, 0);
    assert!(report.last_error.is_none());

    let mut ids = store.ingested_ids();
    ids.sort();
    assert_eq!(ids, vec!["sops/a.md", "sops/sub/b.txt"]);

    // Chunk ids follow "{doc_id}#chunk-{index}"
    let ingests = store.ingests.lock().unwrap();
    let a = ingests
        .iter()
        .find(|r| r.document_id == "sops/a.md")
        .unwrap();
    assert_eq!(a.chunks[0].id, "sops/a.md#chunk-0");

    let state = state::load(&config.state.path).unwrap();
    assert_eq!(state.documents.len(), 2);
    assert_eq!(state.documents["sops/a.md"].version, 1);
    assert!(state.last_run.is_some());

    // The run was reported to the store's admin endpoint
    assert_eq!(store.reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    run_once(&config, &deps, no_cancel(), false).await.unwrap();
    let first_state = state::load(&config.state.path).unwrap();

    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    // Unchanged documents never reach the network
    assert_eq!(store.ingest_count(), 2);
    assert_eq!(report.docs_indexed, 0);
    assert_eq!(report.deleted_docs, 0);

    let second_state = state::load(&config.state.path).unwrap();
    assert_eq!(first_state.documents, second_state.documents);
}

#[tokio::test]
async fn test_edited_file_reingests_with_bumped_version() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root.clone()]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    run_once(&config, &deps, no_cancel(), false).await.unwrap();

    // A one-byte edit
    std::fs::write(root.join("a.md"), "alpha!").unwrap();
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    assert_eq!(report.docs_indexed, 1);
    assert_eq!(store.ingest_count(), 3);
    assert_eq!(
        store.ingested_ids().iter().filter(|id| *id == "sops/a.md").count(),
        2
    );

    let state = state::load(&config.state.path).unwrap();
    assert_eq!(state.documents["sops/a.md"].version, 2);
    assert_eq!(state.documents["sops/b.md"].version, 1);
}

#[tokio::test]
async fn test_deleted_file_is_removed_from_store() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root.clone()]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    run_once(&config, &deps, no_cancel(), false).await.unwrap();

    std::fs::remove_file(root.join("b.md")).unwrap();
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    assert_eq!(report.deleted_docs, 1);
    assert_eq!(store.deletes.lock().unwrap().as_slice(), ["sops/b.md"]);

    let state = state::load(&config.state.path).unwrap();
    assert!(!state.documents.contains_key("sops/b.md"));
    assert!(state.documents.contains_key("sops/a.md"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_is_not_deleted() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root.clone()]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    run_once(&config, &deps, no_cancel(), false).await.unwrap();

    // A permission flap: the file still exists but cannot be read
    let locked = root.join("b.md");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();

    // An observed-but-unreadable file must never count as deleted
    assert_eq!(report.deleted_docs, 0);
    assert_eq!(store.delete_count(), 0);
    let state = state::load(&config.state.path).unwrap();
    assert!(state.documents.contains_key("sops/b.md"));

    // Once readable again the document syncs normally, not as a resurrection
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();
    assert_eq!(report.deleted_docs, 0);
    assert_eq!(report.docs_indexed, 0);
}

#[tokio::test]
async fn test_unhealthy_root_blocks_deletions() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root.clone()]);

    let store = Arc::new(FakeStore::default());
    run_once(
        &config,
        &deps_with(&store, MountHealth::Healthy),
        no_cancel(),
        false,
    )
    .await
    .unwrap();

    // The share "unmounts": files look gone, guard says unhealthy
    std::fs::remove_file(root.join("a.md")).unwrap();
    std::fs::remove_file(root.join("b.md")).unwrap();
    let unhealthy = deps_with(
        &store,
        MountHealth::Unhealthy("mount gone".into()),
    );
    let report = run_once(&config, &unhealthy, no_cancel(), false).await.unwrap();

    assert_eq!(report.deleted_docs, 0);
    assert_eq!(store.delete_count(), 0);
    assert!(report.last_error.is_some());

    // Records survive for when the mount comes back
    let state = state::load(&config.state.path).unwrap();
    assert_eq!(state.documents.len(), 2);
}

#[tokio::test]
async fn test_orphaned_root_is_retained_without_override() {
    let tmp = TempDir::new().unwrap();
    let sops = tmp.path().join("sops");
    let legacy = tmp.path().join("legacy");
    write_kb(&sops, &[("a.md", "alpha")]);
    write_kb(&legacy, &[("old.md", "legacy doc")]);

    let store = Arc::new(FakeStore::default());
    let both = test_config(tmp.path(), vec![sops.clone(), legacy]);
    run_once(
        &both,
        &deps_with(&store, MountHealth::Healthy),
        no_cancel(),
        false,
    )
    .await
    .unwrap();

    // Drop the legacy root from configuration entirely
    let sops_only = test_config(tmp.path(), vec![sops]);
    let report = run_once(
        &sops_only,
        &deps_with(&store, MountHealth::Healthy),
        no_cancel(),
        false,
    )
    .await
    .unwrap();

    assert_eq!(report.deleted_docs, 0);
    assert_eq!(store.delete_count(), 0);
    let state = state::load(&sops_only.state.path).unwrap();
    assert!(state.documents.contains_key("legacy/old.md"));
}

#[tokio::test]
async fn test_orphaned_root_deleted_with_override() {
    let tmp = TempDir::new().unwrap();
    let sops = tmp.path().join("sops");
    let legacy = tmp.path().join("legacy");
    write_kb(&sops, &[("a.md", "alpha")]);
    write_kb(&legacy, &[("old.md", "legacy doc")]);

    let store = Arc::new(FakeStore::default());
    let both = test_config(tmp.path(), vec![sops.clone(), legacy]);
    run_once(
        &both,
        &deps_with(&store, MountHealth::Healthy),
        no_cancel(),
        false,
    )
    .await
    .unwrap();

    let mut sops_only = test_config(tmp.path(), vec![sops]);
    sops_only.sync.allow_root_removal = true;
    let report = run_once(
        &sops_only,
        &deps_with(&store, MountHealth::Healthy),
        no_cancel(),
        false,
    )
    .await
    .unwrap();

    assert_eq!(report.deleted_docs, 1);
    assert_eq!(store.deletes.lock().unwrap().as_slice(), ["legacy/old.md"]);
    let state = state::load(&sops_only.state.path).unwrap();
    assert!(!state.documents.contains_key("legacy/old.md"));
}

#[tokio::test]
async fn test_failed_ingest_does_not_update_state() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("good.md", "fine"), ("bad.md", "rejected upstream")]);
    let config = test_config(tmp.path(), vec![root]);

    let store = Arc::new(FakeStore::default());
    store
        .fail_ingest_for
        .lock()
        .unwrap()
        .insert("sops/bad.md".into());
    let deps = deps_with(&store, MountHealth::Healthy);
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    // One succeeded, one failed, the run completed
    assert_eq!(report.docs_indexed, 1);
    assert!(report.last_error.is_some());

    let state = state::load(&config.state.path).unwrap();
    assert!(state.documents.contains_key("sops/good.md"));
    assert!(!state.documents.contains_key("sops/bad.md"));

    // The failed document is retried next run
    store.fail_ingest_for.lock().unwrap().clear();
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();
    assert_eq!(report.docs_indexed, 1);
    let state = state::load(&config.state.path).unwrap();
    assert!(state.documents.contains_key("sops/bad.md"));
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha")]);
    let config = test_config(tmp.path(), vec![root]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    let report = run_once(&config, &deps, no_cancel(), true).await.unwrap();

    assert_eq!(report.files_seen, 1);
    assert_eq!(report.docs_indexed, 0);
    assert_eq!(store.ingest_count(), 0);
    assert_eq!(store.delete_count(), 0);
    assert!(store.reports.lock().unwrap().is_empty());
    assert!(!config.state.path.exists());
}

#[tokio::test]
async fn test_emptied_store_triggers_full_reingest() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha"), ("b.md", "bravo")]);
    let config = test_config(tmp.path(), vec![root]);

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    run_once(&config, &deps, no_cancel(), false).await.unwrap();
    assert_eq!(store.ingest_count(), 2);

    // The store was wiped out of band; nothing on disk changed
    *store.document_count.lock().unwrap() = Some(0);
    let report = run_once(&config, &deps, no_cancel(), false).await.unwrap();

    assert_eq!(report.docs_indexed, 2);
    assert_eq!(store.ingest_count(), 4);
}

#[tokio::test]
async fn test_concurrent_run_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sops");
    write_kb(&root, &[("a.md", "alpha")]);
    let config = test_config(tmp.path(), vec![root]);

    let _held = RunLock::acquire(&config.state.path).unwrap();

    let store = Arc::new(FakeStore::default());
    let deps = deps_with(&store, MountHealth::Healthy);
    let result = run_once(&config, &deps, no_cancel(), false).await;

    assert!(result.is_err());
    assert_eq!(store.ingest_count(), 0);
}
