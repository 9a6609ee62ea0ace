//! Error handling module
//!
//! Provides the unified error type for every lifecycle operation.
//! Nothing here is retried: each variant aborts the current command.

use std::path::PathBuf;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found. Install the PostgreSQL client tools or set its path in [tools]")]
    ToolNotFound(String),

    #[error("{tool} exited with {}: {}", exit_label(*code), stderr.trim())]
    ProcessFailure {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Checksum verification failed for {}: expected {expected}, got {actual}. Backup may be corrupted", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Confirmation denied: {0} cancelled")]
    ConfirmationDenied(String),

    #[error("Not found: {0}")]
    ResourceNotFound(String),

    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("A verified backup of '{0}' is required before this operation")]
    BackupRequired(String),

    #[error("Backup directory is locked by another operation ({}). Remove it if no dbkeeper process is running", .0.display())]
    Locked(PathBuf),

    #[error("Interrupted")]
    Interrupted,

    #[error("Workflow halted at {stage}: {source}{}", backup_hint(backup))]
    WorkflowHalted {
        stage: String,
        backup: Option<PathBuf>,
        #[source]
        source: Box<AppError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn backup_hint(backup: &Option<PathBuf>) -> String {
    match backup {
        Some(path) => format!(". Restore from backup: {}", path.display()),
        None => String::new(),
    }
}

/// Result type alias for lifecycle operations
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::ResourceNotFound(msg.into())
}
