//! Backup Engine
//!
//! Produces artifacts with pg_dump, then records a sidecar digest for each.

use super::artifact::{BackupArtifact, BackupFormat};
use super::lock::DirLock;
use super::validate_table_name;
use crate::checksum;
use crate::config::{EnvironmentConfig, Settings};
use crate::error::{validation_error, AppError, AppResult};
use crate::process::{run_checked, ProcessRunner, ToolCommand};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What to dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    Full,
    Custom,
    Table(String),
    DataOnly,
    SchemaOnly,
}

impl BackupMode {
    pub fn format(&self) -> BackupFormat {
        match self {
            BackupMode::Full => BackupFormat::Plain,
            BackupMode::Custom => BackupFormat::Custom,
            BackupMode::Table(_) => BackupFormat::Table,
            BackupMode::DataOnly => BackupFormat::DataOnly,
            BackupMode::SchemaOnly => BackupFormat::SchemaOnly,
        }
    }

    /// Mode segment of the default file name
    pub fn label(&self) -> String {
        match self {
            BackupMode::Full => "full".to_string(),
            BackupMode::Custom => "custom".to_string(),
            BackupMode::Table(table) => format!("table-{}", table),
            BackupMode::DataOnly => "data".to_string(),
            BackupMode::SchemaOnly => "schema".to_string(),
        }
    }
}

pub struct BackupEngine {
    settings: Arc<Settings>,
    runner: Arc<dyn ProcessRunner>,
}

impl BackupEngine {
    pub fn new(settings: Arc<Settings>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    /// Plain SQL dump of the whole database
    pub async fn backup_full(&self, env: &EnvironmentConfig, output: Option<PathBuf>) -> AppResult<BackupArtifact> {
        self.backup(env, BackupMode::Full, output).await
    }

    /// Compressed custom-format archive (restorable with pg_restore)
    pub async fn backup_custom(&self, env: &EnvironmentConfig, output: Option<PathBuf>) -> AppResult<BackupArtifact> {
        self.backup(env, BackupMode::Custom, output).await
    }

    pub async fn backup_table(
        &self,
        env: &EnvironmentConfig,
        table: &str,
        output: Option<PathBuf>,
    ) -> AppResult<BackupArtifact> {
        self.backup(env, BackupMode::Table(table.to_string()), output).await
    }

    /// Data only, no schema - useful for data migration
    pub async fn backup_data_only(&self, env: &EnvironmentConfig, output: Option<PathBuf>) -> AppResult<BackupArtifact> {
        self.backup(env, BackupMode::DataOnly, output).await
    }

    /// Schema only, no data - useful for schema comparison
    pub async fn backup_schema_only(&self, env: &EnvironmentConfig, output: Option<PathBuf>) -> AppResult<BackupArtifact> {
        self.backup(env, BackupMode::SchemaOnly, output).await
    }

    pub async fn backup(
        &self,
        env: &EnvironmentConfig,
        mode: BackupMode,
        output: Option<PathBuf>,
    ) -> AppResult<BackupArtifact> {
        if let BackupMode::Table(table) = &mode {
            validate_table_name(table)?;
        }

        let created_at = Utc::now();
        let path = output.unwrap_or_else(|| self.default_path(env, &mode, created_at));
        if path.exists() {
            return Err(validation_error(format!(
                "Refusing to overwrite existing artifact {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Held until the sidecar is written so cleanup cannot race the write
        let _lock = DirLock::acquire(&self.settings.backup.dir)?;

        info!("📦 Creating {} backup of {} database...", mode.label(), env.name);
        info!("   Target file: {}", path.display());

        let command = self.dump_command(env, &mode, &path);
        if let Err(e) = run_checked(self.runner.as_ref(), &command).await {
            discard_partial(&path);
            return Err(e);
        }

        if !path.is_file() {
            return Err(AppError::ProcessFailure {
                tool: command.tool_name().to_string(),
                code: Some(0),
                stderr: format!("no output file was produced at {}", path.display()),
            });
        }

        let checksum = checksum::write_sidecar(&path)?;
        let size_bytes = std::fs::metadata(&path)?.len();

        let artifact = BackupArtifact {
            path,
            format: mode.format(),
            checksum: Some(checksum),
            created_at,
            environment: env.name.clone(),
            table: match mode {
                BackupMode::Table(table) => Some(table),
                _ => None,
            },
            size_bytes,
        };

        info!(
            "✅ Backup created: {} ({:.2} MB)",
            artifact.path.display(),
            artifact.size_mb()
        );
        Ok(artifact)
    }

    /// pg_dump invocation for `mode`, with the environment's connection injected
    pub fn dump_command(&self, env: &EnvironmentConfig, mode: &BackupMode, path: &Path) -> ToolCommand {
        let mut command = ToolCommand::new(&self.settings.tools.pg_dump);

        command = match mode {
            BackupMode::Full => command.arg("--format=plain"),
            BackupMode::Custom => command
                .arg("--format=custom")
                .arg(format!("--compress={}", self.settings.backup.compress_level)),
            BackupMode::Table(table) => command
                .arg("--format=plain")
                .arg(format!("--table={}", table)),
            BackupMode::DataOnly => command.arg("--format=plain").arg("--data-only"),
            BackupMode::SchemaOnly => command.arg("--format=plain").arg("--schema-only"),
        };

        command
            .args(["--verbose", "--no-owner", "--no-acl"])
            .arg(format!("--file={}", path.display()))
            .envs(env.pg_env())
            .output_file(path.to_path_buf())
    }

    /// `backups/<env>_<mode>_<timestamp>.<ext>`
    pub fn default_path(&self, env: &EnvironmentConfig, mode: &BackupMode, at: DateTime<Utc>) -> PathBuf {
        self.settings.backup.dir.join(format!(
            "{}_{}_{}.{}",
            env.name,
            mode.label(),
            at.format("%Y%m%d_%H%M%S"),
            mode.format().extension()
        ))
    }
}

fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove partial backup {}: {}", path.display(), e);
        }
    }
}
