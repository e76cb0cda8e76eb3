//! A small process-wide registry that lets a partially created file be
//! cleaned up if the process is interrupted before `close` runs.
//!
//! Every handle opened for *create* registers its path here on success and
//! deregisters it on a clean close. [`cleanup_incomplete_files`] is not
//! installed as a signal handler by this crate (idiomatic Rust leaves that
//! choice to the application, for example via the `ctrlc` crate); it is
//! exposed so an application's own handler can call it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn registry() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

fn lock() -> Result<std::sync::MutexGuard<'static, HashSet<PathBuf>>> {
    registry().lock().map_err(|e| Error::RegistryUnavailable(e.to_string()))
}

/// Marks `path` as a file currently being created. Call this only after the
/// file has actually been created on disk.
pub fn register_creating(path: &Path) -> Result<()> {
    lock()?.insert(path.to_path_buf());
    log::debug!("registered {} for crash cleanup", path.display());
    Ok(())
}

/// Marks `path` as finalized, so it is no longer a cleanup candidate.
pub fn finalize(path: &Path) -> Result<()> {
    lock()?.remove(path);
    Ok(())
}

/// Deletes every file still registered as incomplete, then clears the
/// registry. Intended to be called from an application's own interrupt
/// handler.
pub fn cleanup_incomplete_files() -> Result<()> {
    let mut guard = lock()?;
    for path in guard.drain() {
        log::warn!("removing incomplete file {} after interrupted create", path.display());
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::error!("failed to remove incomplete file {}: {e}", path.display());
            }
        }
    }
    Ok(())
}

/// The number of files currently registered as incomplete. Exposed mainly
/// for tests.
pub fn incomplete_count() -> Result<usize> {
    Ok(lock()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_finalize_round_trips() {
        let path = std::env::temp_dir().join(format!("czmil-manager-test-{}.tmp", std::process::id()));
        register_creating(&path).unwrap();
        assert!(incomplete_count().unwrap() >= 1);
        finalize(&path).unwrap();
    }

    #[test]
    fn cleanup_removes_registered_files() {
        let path = std::env::temp_dir().join(format!("czmil-manager-cleanup-{}.tmp", std::process::id()));
        std::fs::write(&path, b"partial").unwrap();
        register_creating(&path).unwrap();
        cleanup_incomplete_files().unwrap();
        assert!(!path.exists());
    }
}
