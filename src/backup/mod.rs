//! Backup Module
//!
//! - Backup engine (pg_dump in five modes, sidecar digests)
//! - Artifacts and the verified-backup guard
//! - Backup store (listing, age-based cleanup)
//! - Directory lock shared by writes and cleanup

pub mod artifact;
pub mod engine;
pub mod lock;
pub mod store;

pub use artifact::{BackupArtifact, VerifiedBackup};
pub use engine::{BackupEngine, BackupMode};
pub use store::BackupStore;

use crate::error::{validation_error, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$").expect("valid regex")
});

/// Table filters are passed to pg_dump/pg_restore; only plain identifiers are allowed
pub fn validate_table_name(table: &str) -> AppResult<()> {
    if TABLE_NAME.is_match(table) {
        Ok(())
    } else {
        Err(validation_error(format!("Invalid table name: '{}'", table)))
    }
}
