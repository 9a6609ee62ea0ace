//! Command handlers
//!
//! One function per subcommand. Results go to stdout (JSON for `compare`
//! and `validate`), progress goes through tracing to stderr.

use crate::backup::{BackupArtifact, BackupMode, VerifiedBackup};
use crate::config::EnvironmentConfig;
use crate::confirm::require_phrase;
use crate::error::{AppError, AppResult};
use crate::introspection::SchemaSource;
use crate::snapshot::{CompareReport, DiffEngine, IntegrityValidator};
use crate::state::AppState;
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    /// Plain SQL script
    Plain,
    /// Compressed archive for pg_restore
    Custom,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Environment to back up
    #[arg(short, long)]
    pub env: String,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: DumpFormat,

    /// Back up a single table
    #[arg(short, long, conflicts_with_all = ["data_only", "schema_only", "format"])]
    pub table: Option<String>,

    /// Data only, no schema
    #[arg(long, conflicts_with_all = ["schema_only", "format"])]
    pub data_only: bool,

    /// Schema only, no data
    #[arg(long, conflicts_with = "format")]
    pub schema_only: bool,

    /// Write to this path instead of the backups directory
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl BackupArgs {
    fn mode(&self) -> BackupMode {
        if let Some(table) = &self.table {
            BackupMode::Table(table.clone())
        } else if self.data_only {
            BackupMode::DataOnly
        } else if self.schema_only {
            BackupMode::SchemaOnly
        } else if self.format == DumpFormat::Custom {
            BackupMode::Custom
        } else {
            BackupMode::Full
        }
    }
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Environment to restore into
    #[arg(short, long)]
    pub env: String,

    /// Backup artifact to restore
    #[arg(short, long, value_name = "PATH")]
    pub file: PathBuf,

    /// Drop existing objects first (custom archives)
    #[arg(long)]
    pub drop: bool,

    /// Restore only this table (custom archives)
    #[arg(short, long)]
    pub table: Option<String>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[arg(short, long)]
    pub env: String,

    /// Target revision
    #[arg(short, long, default_value = "head")]
    pub revision: String,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    #[arg(short, long)]
    pub env: String,

    /// Number of revisions to step back
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub steps: u32,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[arg(short, long)]
    pub source: String,

    #[arg(short, long)]
    pub target: String,

    /// Also compare row counts of common tables
    #[arg(long)]
    pub rows: bool,
}

#[derive(Args, Debug)]
pub struct EnvArgs {
    #[arg(short, long)]
    pub env: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[arg(short, long)]
    pub env: String,

    /// List every constraint of the schema
    #[arg(long)]
    pub constraints: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Environment whose schema is the reference (default from config)
    #[arg(long)]
    pub reference: Option<String>,

    /// Environment to update (default from config)
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Keep backups modified within this many days
    #[arg(short, long, default_value_t = 30)]
    pub days: u32,
}

pub async fn backup(state: &AppState, args: BackupArgs) -> AppResult<()> {
    let env = state.env(&args.env)?;
    let engine = &state.backups;
    let artifact = match args.mode() {
        BackupMode::Full => engine.backup_full(env, args.output).await?,
        BackupMode::Custom => engine.backup_custom(env, args.output).await?,
        BackupMode::Table(table) => engine.backup_table(env, &table, args.output).await?,
        BackupMode::DataOnly => engine.backup_data_only(env, args.output).await?,
        BackupMode::SchemaOnly => engine.backup_schema_only(env, args.output).await?,
    };
    print_artifact(&artifact);
    Ok(())
}

pub async fn restore(state: &AppState, args: RestoreArgs) -> AppResult<()> {
    let env = state.env(&args.env)?;
    let artifact = BackupArtifact::open(&args.file)?;

    let safety = match &args.table {
        Some(table) => state.restores.restore_table(&artifact, env, table).await?,
        None => state.restores.restore_full(&artifact, env, args.drop).await?,
    };

    println!("Restored {} from {}", env.name, artifact.path.display());
    if let Some(safety) = safety {
        println!("Pre-restore backup: {}", safety.path().display());
    }
    Ok(())
}

pub async fn migrate(state: &AppState, args: MigrateArgs) -> AppResult<()> {
    let env = state.env(&args.env)?;
    let phrase = &state.settings.workflow.apply_phrase;
    let guard = guard_for(state, env, &format!("migration of {}", env.name), phrase).await?;

    let output = state.migrations.apply(env, &args.revision, guard.as_ref()).await?;
    print!("{}", output);
    Ok(())
}

pub async fn rollback(state: &AppState, args: RollbackArgs) -> AppResult<()> {
    let env = state.env(&args.env)?;
    let phrase = &state.settings.workflow.rollback_phrase;
    let guard = guard_for(state, env, &format!("rollback of {}", env.name), phrase).await?;

    let output = state.migrations.rollback(env, args.steps, guard.as_ref()).await?;
    print!("{}", output);
    Ok(())
}

/// Protected environments get a verified backup and a typed confirmation
/// before any migration tool runs
async fn guard_for(
    state: &AppState,
    env: &EnvironmentConfig,
    action: &str,
    phrase: &str,
) -> AppResult<Option<VerifiedBackup>> {
    if !env.protected {
        return Ok(None);
    }

    info!("Backing up {} before {}...", env.name, action);
    let backup = state.backups.backup_full(env, None).await?.verify()?;
    info!("   Backup verified: {}", backup.path().display());

    warn!("⚠️  {} targets protected environment '{}'", action, env.name);
    require_phrase(state.confirm.as_ref(), action, phrase)?;
    Ok(Some(backup))
}

pub async fn compare(state: &AppState, args: CompareArgs) -> AppResult<()> {
    let source = state.connections.introspector(&args.source).await?;
    let target = state.connections.introspector(&args.target).await?;

    info!("🔍 Comparing {} with {}...", args.source, args.target);
    let source_snapshot = source.snapshot().await?;
    let target_snapshot = target.snapshot().await?;

    let report = CompareReport {
        diff: DiffEngine::diff(&source_snapshot, &target_snapshot),
        row_counts: args
            .rows
            .then(|| DiffEngine::row_counts(&source_snapshot, &target_snapshot)),
    };
    print_json(&report)
}

pub async fn validate(state: &AppState, args: EnvArgs) -> AppResult<()> {
    let source = state.connections.introspector(&args.env).await?;
    let report = IntegrityValidator::validate(&source).await?;
    info!("Status: {:?} ({} issue(s))", report.status(), report.issues.len());
    print_json(&report)
}

pub async fn info(state: &AppState, args: InfoArgs) -> AppResult<()> {
    let env = state.env(&args.env)?;
    let connection = state.connections.test_connection(&args.env).await?;
    let introspector = state.connections.introspector(&args.env).await?;
    let snapshot = introspector.snapshot().await?;
    let version = introspector.migration_version().await?;

    println!("Environment:       {}", env.name);
    println!("Connection:        {}", env.display_string());
    println!("Protected:         {}", env.protected);
    println!("Server:            {} ({} ms)", connection.server_version, connection.latency_ms);
    println!("Database size:     {}", snapshot.database_size);
    println!("Migration version: {}", version.as_deref().unwrap_or("(none)"));
    println!();
    println!("Tables ({}):", snapshot.tables.len());
    for (name, table) in &snapshot.tables {
        println!("  {:<32} {:>10} rows", name, table.row_count);
    }

    let history = state.migrations.history()?;
    println!();
    println!("Migration files ({}):", history.len());
    for file in &history {
        println!("  {}", file);
    }

    if args.constraints {
        println!();
        println!("Constraints:");
        for c in introspector.constraints().await? {
            println!("  {:<32} {:<12} {}", c.table, c.constraint_type, c.constraint_name);
        }
    }
    Ok(())
}

pub async fn update_prod(state: &AppState, args: UpdateArgs) -> AppResult<()> {
    let reference_name = args
        .reference
        .unwrap_or_else(|| state.settings.workflow.reference_env.clone());
    let target_name = args
        .target
        .unwrap_or_else(|| state.settings.workflow.protected_env.clone());

    let target_env = state.env(&target_name)?;
    if !target_env.protected {
        warn!("{} is not marked protected; running the guarded workflow anyway", target_name);
    }

    let reference = state.connections.introspector(&reference_name).await?;
    let target = state.connections.introspector(&target_name).await?;

    let report = state.safe_update().run(&reference, &target, target_env).await?;

    println!("Update of {} completed", target_name);
    println!("Backup: {}", report.backup.path.display());
    println!("New tables: {}", report.diff.tables_only_in_source.len());
    println!("Tables with column changes: {}", report.diff.column_differences.len());
    if report.validation.is_healthy() {
        println!("Validation: healthy");
    } else {
        println!("Validation: {} issue(s)", report.validation.issues.len());
        for issue in &report.validation.issues {
            println!("  - {}", issue);
        }
    }
    Ok(())
}

pub fn list_backups(state: &AppState) -> AppResult<()> {
    let entries = state.backup_store().list()?;
    if entries.is_empty() {
        println!("No backups in {}", state.settings.backup.dir.display());
        return Ok(());
    }

    println!("{:<48} {:>10} {:<20} checksum", "file", "size (MB)", "modified (UTC)");
    for entry in entries {
        println!(
            "{:<48} {:>10.2} {:<20} {}",
            entry.file,
            entry.size_mb(),
            entry.modified.format("%Y-%m-%d %H:%M:%S"),
            if entry.has_checksum { "yes" } else { "no" }
        );
    }
    Ok(())
}

pub fn cleanup(state: &AppState, args: CleanupArgs) -> AppResult<()> {
    let removed = state.backup_store().cleanup(args.days)?;
    for path in &removed {
        println!("Removed {}", path.display());
    }
    println!("{} backup(s) older than {} days removed", removed.len(), args.days);
    Ok(())
}

fn print_artifact(artifact: &BackupArtifact) {
    println!("Backup:   {}", artifact.path.display());
    println!("Size:     {:.2} MB", artifact.size_mb());
    if let Some(checksum) = &artifact.checksum {
        println!("SHA-256:  {}", checksum);
    }
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Validation(format!("Failed to serialize report: {}", e)))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        backup: BackupArgs,
    }

    fn mode(args: &[&str]) -> Result<BackupMode, clap::Error> {
        let argv = std::iter::once("dbkeeper").chain(args.iter().copied());
        Harness::try_parse_from(argv).map(|h| h.backup.mode())
    }

    #[test]
    fn test_backup_mode_selection() {
        assert_eq!(mode(&["--env", "dev"]).unwrap(), BackupMode::Full);
        assert_eq!(mode(&["--env", "dev", "--format", "custom"]).unwrap(), BackupMode::Custom);
        assert_eq!(
            mode(&["--env", "dev", "--table", "users"]).unwrap(),
            BackupMode::Table("users".to_string())
        );
        assert_eq!(mode(&["--env", "dev", "--data-only"]).unwrap(), BackupMode::DataOnly);
        assert_eq!(mode(&["--env", "dev", "--schema-only"]).unwrap(), BackupMode::SchemaOnly);
    }

    #[test]
    fn test_backup_short_flags() {
        let harness = Harness::try_parse_from(["dbkeeper", "-e", "prod", "-t", "users", "-o", "/tmp/users.dump"]).unwrap();
        assert_eq!(harness.backup.env, "prod");
        assert_eq!(harness.backup.mode(), BackupMode::Table("users".to_string()));
        assert_eq!(harness.backup.output, Some(PathBuf::from("/tmp/users.dump")));
        assert_eq!(mode(&["-e", "dev", "-f", "custom"]).unwrap(), BackupMode::Custom);
    }

    #[test]
    fn test_backup_modes_conflict() {
        assert!(mode(&["--env", "dev", "--data-only", "--schema-only"]).is_err());
        assert!(mode(&["--env", "dev", "--table", "users", "--data-only"]).is_err());
    }
}
