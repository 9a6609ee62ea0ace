//! dbkeeper - Database Lifecycle Manager
//!
//! Backup, restore, compare, validate and safely update PostgreSQL
//! environments. Dumps and restores are delegated to the PostgreSQL client
//! tools; schema reads go through a pooled connection.
//!
//! SAFETY MODEL: anything that writes to a protected environment requires a
//! verified backup of that environment and a typed confirmation phrase.

mod backup;
mod checksum;
mod commands;
mod config;
mod confirm;
mod connection;
mod error;
mod introspection;
mod migration;
mod pipeline;
mod process;
mod restore;
mod snapshot;
mod state;

use crate::config::Settings;
use crate::confirm::TerminalConfirmation;
use crate::error::{AppError, AppResult};
use crate::process::SystemRunner;
use crate::state::AppState;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dbkeeper",
    version,
    about = "Backup, restore, compare, validate and safely update PostgreSQL environments"
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH", env = "DBKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (logs always go to stderr)
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump an environment with pg_dump and record its checksum
    Backup(commands::BackupArgs),
    /// Restore an environment from a backup artifact
    Restore(commands::RestoreArgs),
    /// Apply migrations up to a revision
    Migrate(commands::MigrateArgs),
    /// Roll back the latest migrations
    Rollback(commands::RollbackArgs),
    /// Compare the schemas of two environments (JSON on stdout)
    Compare(commands::CompareArgs),
    /// Run integrity checks on an environment (JSON on stdout)
    Validate(commands::EnvArgs),
    /// Show database size, tables, and migration state
    Info(commands::InfoArgs),
    /// Guarded update: backup, diff, confirm, migrate, validate
    UpdateProd(commands::UpdateArgs),
    /// List backup artifacts, newest first
    ListBackups,
    /// Remove backup artifacts older than N days
    Cleanup(commands::CleanupArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose)?;

    let settings = Settings::load(cli.config.as_deref())?;
    debug!("📋 Configuration loaded ({} environments)", settings.environments.len());

    let command_name = cli.command.name();
    let state = AppState::new(settings, Arc::new(SystemRunner), Arc::new(TerminalConfirmation));

    // Dropping the command future releases locks and kills child tools
    let result = tokio::select! {
        result = dispatch(&state, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Interrupted, stopping {}", command_name);
            Err(AppError::Interrupted)
        }
    };
    state.connections.close_all().await;

    if let Err(e) = &result {
        error!("❌ {} failed", command_name);
        debug!("{:?}", e);
    }
    result.map_err(anyhow::Error::from)
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Backup(_) => "backup",
            Commands::Restore(_) => "restore",
            Commands::Migrate(_) => "migrate",
            Commands::Rollback(_) => "rollback",
            Commands::Compare(_) => "compare",
            Commands::Validate(_) => "validate",
            Commands::Info(_) => "info",
            Commands::UpdateProd(_) => "update-prod",
            Commands::ListBackups => "list-backups",
            Commands::Cleanup(_) => "cleanup",
        }
    }
}

async fn dispatch(state: &AppState, command: Commands) -> AppResult<()> {
    match command {
        Commands::Backup(args) => commands::backup(state, args).await,
        Commands::Restore(args) => commands::restore(state, args).await,
        Commands::Migrate(args) => commands::migrate(state, args).await,
        Commands::Rollback(args) => commands::rollback(state, args).await,
        Commands::Compare(args) => commands::compare(state, args).await,
        Commands::Validate(args) => commands::validate(state, args).await,
        Commands::Info(args) => commands::info(state, args).await,
        Commands::UpdateProd(args) => commands::update_prod(state, args).await,
        Commands::ListBackups => commands::list_backups(state),
        Commands::Cleanup(args) => commands::cleanup(state, args),
    }
}

/// Initialize tracing on stderr so stdout stays machine-readable
fn init_tracing(format: LogFormat, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    match format {
        LogFormat::Pretty => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!(e))
}
