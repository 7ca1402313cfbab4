//! Directory scanner.
//!
//! Walks each configured KB root and yields a [`FileRef`] for every
//! supported, non-hidden file. Hidden entries (name starting with the
//! configured prefix) are pruned along with their whole subtree. A
//! permission error or broken link on a single entry is logged and skipped;
//! it never aborts the scan. Re-invoking the scan re-walks from scratch —
//! no state is carried between runs.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{root_label, SyncConfig};
use crate::models::FileRef;

/// Extensions the extraction layer knows how to read.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "log", "pdf", "docx", "csv", "xlsx", "xlsm",
];

/// Scan every configured root, in order, and return the observed files
/// sorted by document id for deterministic processing.
pub fn scan_roots(config: &SyncConfig) -> Result<Vec<FileRef>> {
    let exclude_set = build_globset(&config.exclude_globs)?;
    let mut files = Vec::new();

    for root in &config.roots {
        if !root.is_dir() {
            warn!(root = %root.display(), "KB root missing or not a directory; skipping");
            continue;
        }
        scan_one_root(root, &config.hidden_prefix, &exclude_set, &mut files);
    }

    files.sort_by(|a, b| a.document_id().cmp(&b.document_id()));
    Ok(files)
}

fn scan_one_root(root: &Path, hidden_prefix: &str, excludes: &GlobSet, out: &mut Vec<FileRef>) {
    let label = root_label(root);

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    let hidden = hidden_prefix.to_string();
    for entry in walker.filter_entry(move |e| {
        // Keep the root itself even if its own name is dotted
        e.depth() == 0
            || !e
                .file_name()
                .to_string_lossy()
                .starts_with(hidden.as_str())
    }) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(file_type) = supported_extension(path) else {
            continue;
        };

        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        if excludes.is_match(&rel_str) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat file; skipping");
                continue;
            }
        };
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        out.push(FileRef {
            path: path.to_path_buf(),
            root: label.clone(),
            relative_path: rel_str,
            file_type,
            size: metadata.len(),
            modified,
        });
    }
}

/// The lowercase extension, if it is one the pipeline can extract.
fn supported_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
