//! Content fingerprinting.
//!
//! SHA-256 over the full file bytes is the sole signal of "changed";
//! modification time is recorded for observability but never consulted
//! when deciding whether to re-ingest.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 8192;

/// Streaming SHA-256 of a file's bytes, as a lower-hex digest.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BLOCK_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
