//! Core data models used throughout KB Sync.
//!
//! These types represent the files, documents, chunks, and run summaries that
//! flow through the scan → diff → ingest → delete pipeline, plus the
//! persisted index state that makes runs incremental.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate file observed by the directory scanner.
#[derive(Debug, Clone)]
pub struct FileRef {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Label of the owning KB root (directory basename).
    pub root: String,
    /// Path relative to the root, forward-slash separated.
    pub relative_path: String,
    /// Lowercase file extension without the dot (e.g. `"md"`, `"pdf"`).
    pub file_type: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl FileRef {
    /// The stable document id for this file: `"{root}/{relative_path}"`.
    pub fn document_id(&self) -> String {
        document_id(&self.root, &self.relative_path)
    }
}

/// Derive a document id from a root label and a root-relative path.
///
/// The id is a pure function of its inputs: the same file always maps to the
/// same id across runs, and two distinct files never collide. A rename shows
/// up as a delete of the old id plus a create of the new one.
pub fn document_id(root_label: &str, relative_path: &str) -> String {
    format!("{}/{}", root_label, relative_path)
}

/// The root label embedded in a document id (everything before the first `/`).
pub fn root_label_of(doc_id: &str) -> &str {
    doc_id.split('/').next().unwrap_or(doc_id)
}

/// Sync metadata for one document, persisted in [`IndexState`].
///
/// `version` and `content_hash` are only advanced after the remote store has
/// acknowledged the corresponding chunk set, so the persisted state never
/// claims content the store does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
    pub version: u64,
    pub chunk_count: usize,
}

/// Fixed metadata attached to every chunk sent to the store.
///
/// A named struct rather than an open map so the wire contract is checkable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    /// KB root label the document came from.
    pub source: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub source_path: String,
    /// Bare file name, kept for display in search results.
    pub path: String,
}

/// One unit of text submitted to the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{document_id}#chunk-{index}"`.
    pub id: String,
    pub chunk_index: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// The persisted aggregate: every known document plus the last run time.
///
/// Owned exclusively by the state store; mutated only inside a single run.
/// A `BTreeMap` keeps the on-disk JSON deterministically ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentRecord>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl IndexState {
    /// Distinct root labels referenced by the stored documents.
    pub fn root_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .documents
            .keys()
            .map(|id| root_label_of(id).to_string())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}

/// Ephemeral summary of one run, handed to the status reporter and discarded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub kb_roots: Vec<String>,
    pub files_seen: u64,
    pub docs_indexed: u64,
    pub deleted_docs: u64,
}
