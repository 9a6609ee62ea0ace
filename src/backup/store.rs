//! Backup Store
//!
//! Lists artifacts in the backups directory and removes old ones.
//! The directory is append-only apart from [`BackupStore::cleanup`].

use super::lock::DirLock;
use crate::checksum;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

const SECONDS_PER_DAY: u64 = 86_400;

/// Listing entry for one artifact
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub file: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub has_checksum: bool,
}

impl BackupEntry {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All artifacts, newest first. A missing directory has no backups.
    pub fn list(&self) -> AppResult<Vec<BackupEntry>> {
        let mut entries = Vec::new();
        for path in self.files()? {
            if !is_artifact(&path) {
                continue;
            }
            let metadata = std::fs::metadata(&path)?;
            entries.push(BackupEntry {
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size_bytes: metadata.len(),
                modified: DateTime::<Utc>::from(metadata.modified()?),
                has_checksum: checksum::sidecar_path(&path).exists(),
                path,
            });
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(entries)
    }

    /// Remove artifacts (and their sidecars) last modified more than `keep_days` ago.
    /// Returns the removed artifact paths.
    pub fn cleanup(&self, keep_days: u32) -> AppResult<Vec<PathBuf>> {
        self.cleanup_at(keep_days, SystemTime::now())
    }

    fn cleanup_at(&self, keep_days: u32, now: SystemTime) -> AppResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let _lock = DirLock::acquire(&self.dir)?;

        let cutoff = now
            .checked_sub(Duration::from_secs(u64::from(keep_days) * SECONDS_PER_DAY))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = Vec::new();
        for path in self.files()? {
            // Sidecars go together with their artifact earlier in the loop
            if !path.exists() {
                continue;
            }
            let modified = std::fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                continue;
            }

            if is_artifact(&path) {
                std::fs::remove_file(&path)?;
                let sidecar = checksum::sidecar_path(&path);
                if sidecar.exists() {
                    std::fs::remove_file(&sidecar)?;
                }
                debug!("Removed {}", path.display());
                removed.push(path);
            } else if checksum::is_sidecar(&path) && !path.with_extension("").exists() {
                // Sidecar whose artifact is already gone
                std::fs::remove_file(&path)?;
            }
        }

        info!("🧹 Removed {} backup(s) older than {} days", removed.len(), keep_days);
        Ok(removed)
    }

    fn files(&self) -> AppResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

fn is_artifact(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("sql") | Some("dump")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    fn age(path: &Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY);
        set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
    }

    fn artifact(dir: &Path, name: &str, days_old: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"-- dump").unwrap();
        let sidecar = checksum::sidecar_path(&path);
        checksum::write_sidecar(&path).unwrap();
        age(&path, days_old);
        age(&sidecar, days_old);
        path
    }

    #[test]
    fn test_cleanup_removes_only_expired_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let old = artifact(dir.path(), "prod_full_20251120_080000.sql", 45);
        let fresh = artifact(dir.path(), "prod_custom_20251230_080000.dump", 5);

        let removed = BackupStore::new(dir.path()).cleanup(30).unwrap();

        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(!checksum::sidecar_path(&old).exists());
        assert!(fresh.exists());
        assert!(checksum::sidecar_path(&fresh).exists());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        artifact(dir.path(), "dev_full_a.sql", 10);
        artifact(dir.path(), "dev_full_b.sql", 1);
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let entries = BackupStore::new(dir.path()).list().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(names, vec!["dev_full_b.sql", "dev_full_a.sql"]);
        assert!(entries.iter().all(|e| e.has_checksum));
    }

    #[test]
    fn test_missing_directory() {
        let store = BackupStore::new("/nonexistent/dbkeeper/backups");
        assert!(store.list().unwrap().is_empty());
        assert!(store.cleanup(30).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_respects_lock() {
        let dir = tempfile::tempdir().unwrap();
        let old = artifact(dir.path(), "prod_full_old.sql", 90);

        let _held = DirLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            BackupStore::new(dir.path()).cleanup(30),
            Err(crate::error::AppError::Locked(_))
        ));
        assert!(old.exists());
    }
}
