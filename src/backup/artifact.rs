//! Backup artifacts and the verified-backup guard

use crate::checksum;
use crate::error::{not_found_error, validation_error, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dump flavour of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupFormat {
    Plain,
    Custom,
    Table,
    DataOnly,
    SchemaOnly,
}

impl BackupFormat {
    /// Custom archives go through pg_restore; everything else is a SQL script
    pub fn is_archive(self) -> bool {
        matches!(self, BackupFormat::Custom)
    }

    pub fn extension(self) -> &'static str {
        if self.is_archive() {
            "dump"
        } else {
            "sql"
        }
    }

    /// Best guess for a file found on disk
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("dump") => BackupFormat::Custom,
            _ => BackupFormat::Plain,
        }
    }
}

/// A backup file produced by the backup engine. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub format: BackupFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub size_bytes: u64,
}

impl BackupArtifact {
    /// Load an existing artifact from disk, picking up its sidecar digest
    pub fn open(path: &Path) -> AppResult<Self> {
        if !path.is_file() {
            return Err(not_found_error(format!("Backup file not found: {}", path.display())));
        }

        let metadata = std::fs::metadata(path)?;
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let environment = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('_').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            format: BackupFormat::from_path(path),
            checksum: checksum::read_sidecar(path)?,
            created_at,
            environment,
            table: None,
            size_bytes: metadata.len(),
        })
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Recompute the digest if a sidecar exists.
    /// Returns `false` when there is nothing to verify against.
    pub fn verify_if_present(&self) -> AppResult<bool> {
        match checksum::read_sidecar(&self.path)? {
            Some(expected) => {
                checksum::verify(&self.path, &expected)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Verify against the sidecar; an artifact without one cannot be trusted
    pub fn verify(self) -> AppResult<VerifiedBackup> {
        if !self.verify_if_present()? {
            return Err(validation_error(format!(
                "No checksum sidecar for {}",
                self.path.display()
            )));
        }
        Ok(VerifiedBackup { artifact: self })
    }
}

/// An artifact whose content matched its stored digest.
///
/// Only [`BackupArtifact::verify`] builds one, so holding a `VerifiedBackup`
/// proves a backup was taken and checked. Restores and migrations against
/// protected environments take it as a guard.
#[derive(Debug, Clone)]
pub struct VerifiedBackup {
    artifact: BackupArtifact,
}

impl VerifiedBackup {
    pub fn path(&self) -> &Path {
        &self.artifact.path
    }

    /// Whether this backup was taken from `environment`
    pub fn covers(&self, environment: &str) -> bool {
        self.artifact.environment == environment
    }

    pub fn into_artifact(self) -> BackupArtifact {
        self.artifact
    }
}
