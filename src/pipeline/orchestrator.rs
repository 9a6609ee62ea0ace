//! Orchestrator - guarded update of the protected environment
//!
//! backup → diff → confirm → migrate → validate. Every stage change goes
//! through [`StageTracker`]; a failed or cancelled stage halts the run and
//! the error names the backup taken at the start (when there is one).

use crate::backup::{BackupArtifact, BackupEngine, VerifiedBackup};
use crate::config::{EnvironmentConfig, Settings};
use crate::confirm::{require_phrase, ConfirmationProvider};
use crate::error::{AppError, AppResult};
use crate::introspection::SchemaSource;
use crate::migration::MigrationRunner;
use crate::pipeline::types::{StageTracker, UpdateStage};
use crate::snapshot::{DiffEngine, IntegrityValidator, SchemaDiff, ValidationReport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of a completed update
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub backup: BackupArtifact,
    pub diff: SchemaDiff,
    pub validation: ValidationReport,
    pub trail: Vec<UpdateStage>,
}

pub struct SafeUpdate {
    settings: Arc<Settings>,
    backups: Arc<BackupEngine>,
    migrations: Arc<MigrationRunner>,
    confirm: Arc<dyn ConfirmationProvider>,
}

impl SafeUpdate {
    pub fn new(
        settings: Arc<Settings>,
        backups: Arc<BackupEngine>,
        migrations: Arc<MigrationRunner>,
        confirm: Arc<dyn ConfirmationProvider>,
    ) -> Self {
        Self {
            settings,
            backups,
            migrations,
            confirm,
        }
    }

    /// Bring `target` up to the latest migration, using `reference` for the
    /// preview diff
    pub async fn run(
        &self,
        reference: &dyn SchemaSource,
        target: &dyn SchemaSource,
        target_env: &EnvironmentConfig,
    ) -> AppResult<UpdateReport> {
        let mut stages = StageTracker::new();
        info!("🛡️  Safe update of {} (reference: {})", target_env.name, reference.environment());

        // 1. Backup
        let backup = match self.backup(target_env).await {
            Ok(backup) => backup,
            Err(e) => {
                stages.advance(UpdateStage::BackupFailed)?;
                error!("❌ Backup failed, nothing was changed");
                return Err(halt(UpdateStage::BackupFailed, None, e));
            }
        };
        stages.advance(UpdateStage::BackupDone)?;
        let backup_path = Some(backup.path().to_path_buf());

        // 2. Diff
        let diff = match Self::preview(reference, target).await {
            Ok(diff) => diff,
            Err(e) => return Err(halt(UpdateStage::DiffComputed, backup_path, e)),
        };
        stages.advance(UpdateStage::DiffComputed)?;

        // 3. Confirm
        stages.advance(UpdateStage::AwaitingConfirmation)?;
        if let Err(e) = require_phrase(
            self.confirm.as_ref(),
            &format!("migration of {}", target_env.name),
            &self.settings.workflow.apply_phrase,
        ) {
            stages.advance(UpdateStage::Cancelled)?;
            warn!("Update cancelled; backup kept at {}", backup.path().display());
            return Err(halt(UpdateStage::Cancelled, backup_path, e));
        }
        stages.advance(UpdateStage::Confirmed)?;

        // 4. Migrate
        if let Err(e) = self.migrations.apply(target_env, "head", Some(&backup)).await {
            stages.advance(UpdateStage::MigrationFailed)?;
            error!("❌ Migration failed. Restore from backup: {}", backup.path().display());
            return Err(halt(UpdateStage::MigrationFailed, backup_path, e));
        }
        stages.advance(UpdateStage::MigrationApplied)?;

        // 5. Validate
        let validation = match IntegrityValidator::validate(target).await {
            Ok(report) => report,
            Err(e) => return Err(halt(UpdateStage::Validated, backup_path, e)),
        };
        stages.advance(UpdateStage::Validated)?;
        stages.advance(UpdateStage::Completed)?;

        info!("✅ {} updated successfully", target_env.name);
        Ok(UpdateReport {
            backup: backup.into_artifact(),
            diff,
            validation,
            trail: stages.into_trail(),
        })
    }

    async fn backup(&self, env: &EnvironmentConfig) -> AppResult<VerifiedBackup> {
        info!("Step 1/5: backing up {}...", env.name);
        let verified = self.backups.backup_full(env, None).await?.verify()?;
        info!("   Backup verified: {}", verified.path().display());
        Ok(verified)
    }

    async fn preview(reference: &dyn SchemaSource, target: &dyn SchemaSource) -> AppResult<SchemaDiff> {
        info!("Step 2/5: comparing {} with {}...", reference.environment(), target.environment());
        let source = reference.snapshot().await?;
        let current = target.snapshot().await?;
        let diff = DiffEngine::diff(&source, &current);

        if diff.is_identical() {
            info!("   No structural differences");
        }
        for table in &diff.tables_only_in_source {
            info!("   New table: {}", table);
        }
        for (table, columns) in &diff.column_differences {
            for column in &columns.only_in_source {
                info!("   New column: {}.{}", table, column);
            }
            for column in &columns.only_in_target {
                warn!("   Column only in {}: {}.{}", target.environment(), table, column);
            }
            for change in &columns.type_differences {
                warn!(
                    "   Type change: {}.{} {} -> {}",
                    table, change.column, change.target_type, change.source_type
                );
            }
        }
        Ok(diff)
    }
}

fn halt(stage: UpdateStage, backup: Option<PathBuf>, source: AppError) -> AppError {
    AppError::WorkflowHalted {
        stage: stage.label().to_string(),
        backup,
        source: Box::new(source),
    }
}
