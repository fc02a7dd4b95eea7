//! Single-writer discipline for update runs.
//!
//! [`RunGuard`] serializes runs inside one process: a second trigger while a
//! run is active gets `None` back and must do nothing. [`LockFile`] extends
//! the same rule across processes (the CLI and a running server) sharing
//! one index; a lock older than the configured TTL is considered abandoned
//! and reclaimed.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct RunGuard {
    slot: Arc<Mutex<()>>,
}

/// Proof that the holder owns the run slot. Released on drop.
pub struct RunTicket {
    _guard: OwnedMutexGuard<()>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunTicket> {
        self.slot
            .clone()
            .try_lock_owned()
            .ok()
            .map(|g| RunTicket { _guard: g })
    }

    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Cross-process lock file next to the index database.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Lock path for the index at `index_path`.
    pub fn path_for(index_path: &Path) -> PathBuf {
        index_path.with_extension("lock")
    }

    /// Try to take the lock. `Ok(None)` means another live run holds it.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Option<LockFile>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut f) => {
                    writeln!(f, "{}", std::process::id())?;
                    writeln!(f, "{}", Utc::now().to_rfc3339())?;
                    return Ok(Some(LockFile {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !is_stale(path, stale_after) {
                        return Ok(None);
                    }
                    tracing::warn!(path = %path.display(), "reclaiming stale update lock");
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e).context("Failed to remove stale lock"),
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create lock {}", path.display()))
                }
            }
        }
        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not remove lock file");
        }
    }
}

/// Holder's timestamp from the lock body, falling back to file mtime.
fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let written: Option<DateTime<Utc>> = std::fs::read_to_string(path)
        .ok()
        .and_then(|body| {
            body.lines()
                .nth(1)
                .and_then(|l| DateTime::parse_from_rfc3339(l.trim()).ok())
        })
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        });

    match written {
        Some(ts) => (Utc::now() - ts)
            .to_std()
            .map(|age| age >= stale_after)
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let guard = RunGuard::new();
        let ticket = guard.try_acquire().expect("first acquire");
        assert!(guard.is_running());
        assert!(guard.clone().try_acquire().is_none());
        drop(ticket);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn lock_file_is_exclusive_and_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = LockFile::path_for(&dir.path().join("index.sqlite"));
        let held = LockFile::acquire(&path, Duration::from_secs(3600))
            .unwrap()
            .expect("lock");
        assert!(path.exists());
        assert!(LockFile::acquire(&path, Duration::from_secs(3600))
            .unwrap()
            .is_none());
        drop(held);
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.lock");
        std::fs::write(&path, "99999\n2000-01-01T00:00:00+00:00\n").unwrap();
        let lock = LockFile::acquire(&path, Duration::from_secs(60)).unwrap();
        assert!(lock.is_some());
    }
}
