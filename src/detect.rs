//! Change detection.
//!
//! Compares one scan's observations against the persisted index state and
//! partitions every document into exactly one class. The content hash is the
//! only change signal; a document whose hash matches its stored record is
//! skipped entirely — no extraction, no network call.
//!
//! Documents that exist in state but were not observed split two ways:
//! `deleted` when their root is still configured (the file really went
//! away), `orphaned` when the whole root was dropped from configuration.
//! Orphans are never deleted automatically; only the explicit
//! `allow_root_removal` override reclassifies them.
//!
//! A file the scanner observed but that could not be fingerprinted (read
//! error, cancelled run) counts as seen: it lands in no class at all —
//! never synced this run, and never mistaken for a deletion.

use crate::models::{root_label_of, FileRef, IndexState};

/// A scanned file together with its content fingerprint.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub file: FileRef,
    pub content_hash: String,
}

/// The outcome of diffing one scan against the index state.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Document id not present in state.
    pub new: Vec<ScannedFile>,
    /// Present, but the digest differs from the stored hash.
    pub changed: Vec<ScannedFile>,
    /// Present with a matching digest; counted but never processed.
    pub unchanged: Vec<String>,
    /// In state, root still configured, file not observed this scan.
    pub deleted: Vec<String>,
    /// In state, but the owning root is no longer configured at all.
    pub orphaned: Vec<String>,
}

impl ChangeSet {
    /// Documents that need an ingest call this run.
    pub fn to_sync(&self) -> impl Iterator<Item = &ScannedFile> {
        self.new.iter().chain(self.changed.iter())
    }
}

/// Partition the scan against the current state.
///
/// `unhashed` lists document ids that were observed on disk but have no
/// usable fingerprint this run; they are excluded from every class.
/// With no prior state every scanned file lands in `new` (first run).
pub fn detect_changes(
    scanned: Vec<ScannedFile>,
    unhashed: &[String],
    state: &IndexState,
    configured_labels: &[String],
) -> ChangeSet {
    let mut set = ChangeSet::default();
    let mut seen_ids: std::collections::BTreeSet<String> = unhashed.iter().cloned().collect();

    for item in scanned {
        let doc_id = item.file.document_id();
        seen_ids.insert(doc_id.clone());

        match state.documents.get(&doc_id) {
            None => set.new.push(item),
            Some(record) if record.content_hash != item.content_hash => set.changed.push(item),
            Some(_) => set.unchanged.push(doc_id),
        }
    }

    for doc_id in state.documents.keys() {
        if seen_ids.contains(doc_id) {
            continue;
        }
        let label = root_label_of(doc_id);
        if configured_labels.iter().any(|l| l == label) {
            set.deleted.push(doc_id.clone());
        } else {
            set.orphaned.push(doc_id.clone());
        }
    }

    set
}
