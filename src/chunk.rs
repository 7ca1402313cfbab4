//! Bounded text chunker.
//!
//! Splits extracted document text into pieces of roughly `target_chars`
//! characters, cutting at the nearest newline or space found within a
//! bounded window behind the target and falling back to a hard cut when a
//! piece has no usable boundary (e.g. one long unbroken token).
//!
//! Tagging is two-pass: the full split happens first, because every chunk's
//! metadata carries the total `chunk_count`, which is unknown until the
//! whole document has been split.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, FileRef};

/// Split text into pieces of at most `target_chars` bytes (a single char
/// wider than the target is emitted whole).
///
/// Pieces are trimmed and never empty; whitespace-only remainders are
/// dropped. Apart from boundary whitespace, no text is lost or duplicated.
pub fn split_text(text: &str, target_chars: usize, boundary_window: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if rest.len() <= target_chars {
            pieces.push(rest.trim().to_string());
            break;
        }

        // Hard-cut position, pulled back to a char boundary
        let mut end = target_chars;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        // A target narrower than the leading char must still consume it,
        // or the loop would never advance
        if end == 0 {
            end = rest
                .chars()
                .next()
                .map(|c| c.len_utf8())
                .unwrap_or(rest.len());
        }

        // Prefer a newline, then a space, within the tolerance window
        let window_start = end.saturating_sub(boundary_window);
        let cut = rest[..end]
            .rfind('\n')
            .filter(|&pos| pos >= window_start)
            .or_else(|| rest[..end].rfind(' ').filter(|&pos| pos >= window_start))
            .map(|pos| pos + 1)
            .unwrap_or(end);

        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        rest = &rest[cut..];
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Split a document's text and tag every piece with its position metadata.
///
/// Chunk ids follow the store's convention: `"{document_id}#chunk-{index}"`.
pub fn build_chunks(file: &FileRef, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let doc_id = file.document_id();
    let pieces = split_text(text, config.target_chars, config.boundary_window);
    let chunk_count = pieces.len();

    let file_name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: format!("{}#chunk-{}", doc_id, index),
            chunk_index: index,
            text,
            metadata: ChunkMetadata {
                document_id: doc_id.clone(),
                source: file.root.clone(),
                file_type: file.file_type.clone(),
                chunk_index: index,
                chunk_count,
                source_path: file.path.display().to_string(),
                path: file_name.clone(),
            },
        })
        .collect()
}
