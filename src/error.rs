//! Per-document error taxonomy for the sync pipeline.
//!
//! These failures are local to one file or one deletion and never abort the
//! run; the orchestrator records them into the run report's `last_error` and
//! moves on. The classification decides retry behavior in the HTTP gateway:
//! transient errors are retried with backoff, permanent ones fail fast.
//!
//! The only run-fatal conditions live elsewhere: a corrupt state file
//! (`state::StateError::Corrupt`) and a run lock already held.

use thiserror::Error;

/// A non-fatal failure while processing one document or deletion.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The file's text could not be extracted; the file is skipped.
    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Timeout, connection failure, 429 or 5xx. Retried with backoff;
    /// exhausted retries degrade to a per-file failure.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A 4xx response other than 429. Never retried.
    #[error("request rejected with status {status}: {body}")]
    PermanentRequest { status: u16, body: String },

    /// A KB root failed its mount health check. Disables the deletion
    /// phase for that root's documents; ingestion is unaffected.
    #[error("mount unhealthy for root '{root}': {reason}")]
    MountUnhealthy { root: String, reason: String },
}

impl SyncError {
    /// Whether the gateway should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Classify an HTTP error status per the retry policy.
    ///
    /// 429 and 5xx are transient (rate limiting, server trouble); any other
    /// 4xx is permanent.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || (500..600).contains(&status) {
            SyncError::TransientNetwork(format!("HTTP {}: {}", status, body))
        } else {
            SyncError::PermanentRequest { status, body }
        }
    }

    /// Transport-level reqwest failures (timeouts, refused connections,
    /// resets) are all transient by definition.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        SyncError::TransientNetwork(err.to_string())
    }
}
