//! Restore Engine
//!
//! Order of gates: artifact exists, checksum matches (when a sidecar is
//! present), operator confirms (protected targets), a fresh verified backup
//! of the target is taken (protected targets), then the restore tool runs.
//! Nothing is rolled back automatically; recovery goes through backups.

use crate::backup::{validate_table_name, BackupArtifact, BackupEngine, VerifiedBackup};
use crate::config::{EnvironmentConfig, Settings};
use crate::confirm::{require_phrase, ConfirmationProvider};
use crate::error::{validation_error, AppError, AppResult};
use crate::process::{run_checked, ProcessRunner, ToolCommand};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RestoreEngine {
    settings: Arc<Settings>,
    runner: Arc<dyn ProcessRunner>,
    backups: Arc<BackupEngine>,
    confirm: Arc<dyn ConfirmationProvider>,
}

impl RestoreEngine {
    pub fn new(
        settings: Arc<Settings>,
        runner: Arc<dyn ProcessRunner>,
        backups: Arc<BackupEngine>,
        confirm: Arc<dyn ConfirmationProvider>,
    ) -> Self {
        Self {
            settings,
            runner,
            backups,
            confirm,
        }
    }

    /// Restore a whole artifact into `env`. `drop_existing` adds `--clean`
    /// for custom archives.
    pub async fn restore_full(
        &self,
        artifact: &BackupArtifact,
        env: &EnvironmentConfig,
        drop_existing: bool,
    ) -> AppResult<Option<VerifiedBackup>> {
        let safety = self.prepare(artifact, env, "restore").await?;

        let command = if artifact.format.is_archive() {
            let mut command = self.pg_restore(env);
            if drop_existing {
                command = command.arg("--clean");
            }
            command.arg(artifact.path.display().to_string())
        } else {
            if drop_existing {
                warn!("--drop has no effect on plain SQL artifacts; the script runs as written");
            }
            ToolCommand::new(&self.settings.tools.psql)
                .args(["--set", "ON_ERROR_STOP=1"])
                .arg(format!("--file={}", artifact.path.display()))
                .envs(env.pg_env())
        };

        info!("♻️  Restoring {} from {}...", env.name, artifact.path.display());
        run_checked(self.runner.as_ref(), &command).await?;
        info!("✅ Database restored from {}", artifact.path.display());
        Ok(safety)
    }

    /// Restore one table from a custom-format archive
    pub async fn restore_table(
        &self,
        artifact: &BackupArtifact,
        env: &EnvironmentConfig,
        table: &str,
    ) -> AppResult<Option<VerifiedBackup>> {
        validate_table_name(table)?;
        if !artifact.format.is_archive() {
            return Err(validation_error(format!(
                "Table restore needs a custom-format (.dump) artifact; {} is plain SQL",
                artifact.path.display()
            )));
        }

        let safety = self.prepare(artifact, env, &format!("restore of table {}", table)).await?;

        let command = self
            .pg_restore(env)
            .arg(format!("--table={}", table))
            .arg(artifact.path.display().to_string());

        info!("♻️  Restoring table {} on {} from {}...", table, env.name, artifact.path.display());
        run_checked(self.runner.as_ref(), &command).await?;
        info!("✅ Table {} restored", table);
        Ok(safety)
    }

    /// Run every gate before the restore tool. For protected targets the
    /// returned backup is the pre-restore state of `env`.
    async fn prepare(
        &self,
        artifact: &BackupArtifact,
        env: &EnvironmentConfig,
        action: &str,
    ) -> AppResult<Option<VerifiedBackup>> {
        if !artifact.path.is_file() {
            return Err(AppError::ResourceNotFound(format!(
                "Backup file not found: {}",
                artifact.path.display()
            )));
        }

        if artifact.verify_if_present()? {
            info!("🔐 Checksum verified for {}", artifact.path.display());
        } else {
            warn!("No checksum sidecar for {}; integrity not verified", artifact.path.display());
        }

        if !env.protected {
            return Ok(None);
        }

        warn!("⚠️  This will restore data into protected environment '{}'", env.name);
        warn!("   Backup file: {}", artifact.path.display());
        require_phrase(self.confirm.as_ref(), action, &self.settings.workflow.restore_phrase)?;

        info!("Taking a safety backup of {} before restoring...", env.name);
        let safety = self.backups.backup_full(env, None).await?.verify()?;
        info!("   Pre-restore state saved to {}", safety.path().display());
        Ok(Some(safety))
    }

    fn pg_restore(&self, env: &EnvironmentConfig) -> ToolCommand {
        ToolCommand::new(&self.settings.tools.pg_restore)
            .args(["--verbose", "--no-owner", "--no-acl"])
            .arg(format!("--dbname={}", env.database))
            .envs(env.pg_env())
    }
}
