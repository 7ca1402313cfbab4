//! Mount safety guard.
//!
//! Deleting documents from the store because their files "disappeared" is
//! only safe when the filesystem can be trusted. A network share that failed
//! to mount looks exactly like a directory whose files were all deleted, so
//! every root is probed before the deletion phase: the root must exist, be a
//! directory, be an active mount boundary (not just an empty local
//! directory), and contain at least one entry (SMB sometimes mounts but
//! serves an empty tree).
//!
//! The probe is read-only. An `Unhealthy` verdict disables deletions for
//! that root's documents for this run only; ingestion of reachable files is
//! unaffected.

use std::path::Path;

/// Verdict of a root health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountHealth {
    Healthy,
    Unhealthy(String),
}

impl MountHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, MountHealth::Healthy)
    }
}

/// Read-only probe of a configured KB root.
///
/// A trait seam so tests can substitute fixed verdicts; production uses
/// [`OsMountGuard`].
pub trait MountGuard: Send + Sync {
    fn check_root(&self, root: &Path) -> MountHealth;
}

/// Guard backed by real filesystem metadata.
pub struct OsMountGuard;

impl MountGuard for OsMountGuard {
    fn check_root(&self, root: &Path) -> MountHealth {
        if !root.is_dir() {
            return MountHealth::Unhealthy(format!(
                "{} does not exist or is not a directory",
                root.display()
            ));
        }

        if !is_mount_point(root) {
            return MountHealth::Unhealthy(format!(
                "{} is not an active mount point",
                root.display()
            ));
        }

        match std::fs::read_dir(root) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    MountHealth::Unhealthy(format!("{} is mounted but empty", root.display()))
                } else {
                    MountHealth::Healthy
                }
            }
            Err(e) => MountHealth::Unhealthy(format!("cannot list {}: {}", root.display(), e)),
        }
    }
}

/// A path is a mount boundary when its device id differs from its parent's,
/// or it has no parent (filesystem root).
#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        return true;
    };
    match std::fs::metadata(parent) {
        Ok(parent_meta) => meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> bool {
    // No portable mount probe; rely on the existence and non-empty checks.
    true
}
