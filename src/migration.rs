//! Migration Runner
//!
//! Thin wrapper over the external versioned-migration tool (alembic by
//! default). Against a protected environment every call must present a
//! verified backup of that environment.

use crate::backup::VerifiedBackup;
use crate::config::{EnvironmentConfig, Settings};
use crate::error::{validation_error, AppError, AppResult};
use crate::process::{run_checked, ProcessRunner, ToolCommand};
use std::sync::Arc;
use tracing::{info, warn};

pub struct MigrationRunner {
    settings: Arc<Settings>,
    runner: Arc<dyn ProcessRunner>,
}

impl MigrationRunner {
    pub fn new(settings: Arc<Settings>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    /// Upgrade to `revision` ("head" for latest). Returns the tool's stdout.
    pub async fn apply(
        &self,
        env: &EnvironmentConfig,
        revision: &str,
        guard: Option<&VerifiedBackup>,
    ) -> AppResult<String> {
        if revision.trim().is_empty() {
            return Err(validation_error("Revision must not be empty"));
        }
        check_guard(env, guard)?;

        info!("🚀 Running migration on {} to {}...", env.name, revision);
        let command = self.command(env).arg("upgrade").arg(revision);
        let output = run_checked(self.runner.as_ref(), &command).await?;
        info!("✅ Migration to {} completed", revision);
        Ok(output.stdout)
    }

    /// Downgrade by `steps` revisions
    pub async fn rollback(
        &self,
        env: &EnvironmentConfig,
        steps: u32,
        guard: Option<&VerifiedBackup>,
    ) -> AppResult<String> {
        if steps == 0 {
            return Err(validation_error("Rollback steps must be at least 1"));
        }
        check_guard(env, guard)?;

        warn!("⏪ Rolling back {} migration(s) on {}...", steps, env.name);
        let command = self.command(env).arg("downgrade").arg(format!("-{}", steps));
        let output = run_checked(self.runner.as_ref(), &command).await?;
        info!("✅ Rolled back {} migration(s)", steps);
        Ok(output.stdout)
    }

    /// Migration files known locally, sorted by name
    pub fn history(&self) -> AppResult<Vec<String>> {
        let dir = &self.settings.migrations.versions_dir;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("py") {
                if let Some(name) = path.file_name() {
                    files.push(name.to_string_lossy().into_owned());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn command(&self, env: &EnvironmentConfig) -> ToolCommand {
        let (program, prefix) = self
            .settings
            .tools
            .migrate
            .split_first()
            .map(|(p, rest)| (p.clone(), rest.to_vec()))
            .unwrap_or_else(|| ("alembic".to_string(), Vec::new()));

        ToolCommand::new(program)
            .args(prefix)
            .envs(env.pg_env())
            .envs(vec![("DATABASE_URL".to_string(), env.connection_string())])
    }
}

/// Protected environments only move forward with a verified backup in hand
fn check_guard(env: &EnvironmentConfig, guard: Option<&VerifiedBackup>) -> AppResult<()> {
    if !env.protected {
        return Ok(());
    }
    match guard {
        Some(backup) if backup.covers(&env.name) => Ok(()),
        _ => Err(AppError::BackupRequired(env.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupEngine;
    use crate::process::testing::FakeRunner;

    fn setup(dir: &std::path::Path, runner: Arc<FakeRunner>) -> (Arc<Settings>, MigrationRunner) {
        let mut settings = Settings::default();
        settings.backup.dir = dir.join("backups");
        settings.migrations.versions_dir = dir.join("versions");
        let settings = Arc::new(settings);
        (settings.clone(), MigrationRunner::new(settings, runner))
    }

    #[tokio::test]
    async fn test_apply_unprotected_without_guard() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (settings, migrations) = setup(dir.path(), runner.clone());
        let dev = settings.registry().get("dev").unwrap().clone();

        migrations.apply(&dev, "head", None).await.unwrap();

        let call = &runner.calls()[0];
        assert_eq!(call.program, "alembic");
        assert_eq!(call.args, vec!["upgrade", "head"]);
        assert!(call.env.iter().any(|(k, _)| k == "DATABASE_URL"));
    }

    #[tokio::test]
    async fn test_protected_requires_matching_guard() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (settings, migrations) = setup(dir.path(), runner.clone());
        let registry = settings.registry();
        let prod = registry.get("prod").unwrap().clone();
        let dev = registry.get("dev").unwrap().clone();

        let err = migrations.apply(&prod, "head", None).await.unwrap_err();
        assert!(matches!(err, AppError::BackupRequired(_)));
        assert!(runner.calls().is_empty());

        // A backup of another environment does not count
        let backups = BackupEngine::new(settings.clone(), runner.clone());
        let dev_backup = backups.backup_full(&dev, None).await.unwrap().verify().unwrap();
        let err = migrations.rollback(&prod, 1, Some(&dev_backup)).await.unwrap_err();
        assert!(matches!(err, AppError::BackupRequired(_)));

        let prod_backup = backups.backup_full(&prod, None).await.unwrap().verify().unwrap();
        migrations.rollback(&prod, 2, Some(&prod_backup)).await.unwrap();
        let last = runner.calls().pop().unwrap();
        assert_eq!(last.args, vec!["downgrade", "-2"]);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().failing("alembic"));
        let (settings, migrations) = setup(dir.path(), runner.clone());
        let dev = settings.registry().get("dev").unwrap().clone();

        let err = migrations.apply(&dev, "abc123", None).await.unwrap_err();
        assert!(matches!(err, AppError::ProcessFailure { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_zero_steps() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (settings, migrations) = setup(dir.path(), runner.clone());
        let dev = settings.registry().get("dev").unwrap().clone();

        assert!(migrations.rollback(&dev, 0, None).await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_history_lists_python_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let (_, migrations) = setup(dir.path(), Arc::new(FakeRunner::new()));
        assert!(migrations.history().unwrap().is_empty());

        let versions = dir.path().join("versions");
        std::fs::create_dir_all(versions.join("__pycache__")).unwrap();
        std::fs::write(versions.join("b2_add_goals.py"), "").unwrap();
        std::fs::write(versions.join("a1_initial.py"), "").unwrap();
        std::fs::write(versions.join("README"), "").unwrap();

        assert_eq!(
            migrations.history().unwrap(),
            vec!["a1_initial.py".to_string(), "b2_add_goals.py".to_string()]
        );
    }
}
