//! Backups directory lock
//!
//! Backup writes and age-based cleanup both take this lock so cleanup can
//! never delete an artifact that is still being written. Contention fails
//! immediately; nothing waits or retries. A lock whose recorded pid no
//! longer exists was left by a killed process and is taken over.

use crate::error::{AppError, AppResult};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = ".dbkeeper.lock";

/// Held for as long as the value lives; released on drop
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);

        match Self::create(&path) {
            Err(AppError::Locked(_)) if Self::is_stale(&path) => {
                warn!("⚠️  Removing stale lock {} left by a dead process", path.display());
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                // Someone else may take it between the remove and this create
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> AppResult<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AppError::Locked(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "pid={} acquired_at={}", std::process::id(), Utc::now().to_rfc3339())?;

        debug!("Acquired {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// True only when the lock names a pid that is definitely gone
    fn is_stale(path: &Path) -> bool {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return false,
        };
        match holder_pid(&contents) {
            Some(pid) => pid != std::process::id() && !process_alive(pid),
            None => false,
        }
    }
}

fn holder_pid(contents: &str) -> Option<u32> {
    contents
        .split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// No cheap liveness check elsewhere; leave the lock to the operator
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
