//! Integrity Validator
//!
//! Advisory checks over a snapshot. Nothing here blocks a workflow; the
//! report's status only says whether anything was flagged.

use crate::error::AppError;
use crate::introspection::{SchemaSnapshot, SchemaSource};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Healthy,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub row_count: i64,
    pub column_count: usize,
    pub index_count: usize,
    pub foreign_key_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub environment: String,
    status: ValidationStatus,
    pub issues: Vec<String>,
    pub tables: BTreeMap<String, TableStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_version: Option<String>,
    pub database_size: String,
}

impl ValidationReport {
    /// Status is derived from `issues` and cannot be set independently
    pub fn new(
        environment: String,
        issues: Vec<String>,
        tables: BTreeMap<String, TableStats>,
        migration_version: Option<String>,
        database_size: String,
    ) -> Self {
        let status = if issues.is_empty() {
            ValidationStatus::Healthy
        } else {
            ValidationStatus::Warning
        };
        Self {
            environment,
            status,
            issues,
            tables,
            migration_version,
            database_size,
        }
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ValidationStatus::Healthy
    }
}

pub struct IntegrityValidator;

impl IntegrityValidator {
    pub async fn validate(source: &dyn SchemaSource) -> Result<ValidationReport, AppError> {
        info!("🔍 Validating {}...", source.environment());
        let snapshot = source.snapshot().await?;
        let version = source.migration_version().await?;
        let report = Self::build_report(&snapshot, version);

        if report.is_healthy() {
            info!("✅ {} is healthy", report.environment);
        } else {
            for issue in &report.issues {
                warn!("⚠️  {}", issue);
            }
        }
        Ok(report)
    }

    pub fn build_report(snapshot: &SchemaSnapshot, migration_version: Option<String>) -> ValidationReport {
        let mut issues = Vec::new();
        let mut tables = BTreeMap::new();

        for (name, table) in &snapshot.tables {
            tables.insert(
                name.clone(),
                TableStats {
                    row_count: table.row_count,
                    column_count: table.columns.len(),
                    index_count: table.indexes.len(),
                    foreign_key_count: table.foreign_keys.len(),
                },
            );

            for fk in &table.foreign_keys {
                if !snapshot.tables.contains_key(&fk.referenced_table) {
                    issues.push(format!(
                        "Table {} has FK to non-existent table {}",
                        name, fk.referenced_table
                    ));
                }
            }
        }

        if migration_version.is_none() {
            issues.push("No migration version found - migrations may not be initialized".to_string());
        }

        ValidationReport::new(
            snapshot.environment.clone(),
            issues,
            tables,
            migration_version,
            snapshot.database_size.clone(),
        )
    }
}
