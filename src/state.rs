//! Application state management
//!
//! Wires settings, the process runner, the confirmation provider and the
//! engines together once per invocation. Command handlers only see this.

use crate::backup::{BackupEngine, BackupStore};
use crate::config::{EnvironmentConfig, EnvironmentRegistry, Settings};
use crate::confirm::ConfirmationProvider;
use crate::connection::ConnectionManager;
use crate::error::AppResult;
use crate::migration::MigrationRunner;
use crate::pipeline::SafeUpdate;
use crate::process::ProcessRunner;
use crate::restore::RestoreEngine;
use std::sync::Arc;

/// State shared by every command handler
pub struct AppState {
    pub settings: Arc<Settings>,

    /// Environment name -> connection parameters
    pub registry: EnvironmentRegistry,

    /// Lazily opened pools, closed by the CLI before exit
    pub connections: ConnectionManager,

    pub confirm: Arc<dyn ConfirmationProvider>,

    pub backups: Arc<BackupEngine>,
    pub migrations: Arc<MigrationRunner>,
    pub restores: RestoreEngine,
}

impl AppState {
    pub fn new(
        settings: Settings,
        runner: Arc<dyn ProcessRunner>,
        confirm: Arc<dyn ConfirmationProvider>,
    ) -> Self {
        let settings = Arc::new(settings);
        let backups = Arc::new(BackupEngine::new(settings.clone(), runner.clone()));
        let migrations = Arc::new(MigrationRunner::new(settings.clone(), runner.clone()));
        let restores = RestoreEngine::new(settings.clone(), runner, backups.clone(), confirm.clone());

        Self {
            registry: settings.registry(),
            connections: ConnectionManager::new(settings.clone()),
            settings,
            confirm,
            backups,
            migrations,
            restores,
        }
    }

    /// Look up an environment by name
    pub fn env(&self, name: &str) -> AppResult<&EnvironmentConfig> {
        self.registry.get(name)
    }

    pub fn backup_store(&self) -> BackupStore {
        BackupStore::new(self.settings.backup.dir.clone())
    }

    pub fn safe_update(&self) -> SafeUpdate {
        SafeUpdate::new(
            self.settings.clone(),
            self.backups.clone(),
            self.migrations.clone(),
            self.confirm.clone(),
        )
    }
}
