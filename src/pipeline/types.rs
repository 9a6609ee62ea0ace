//! Stage types for the safe update workflow

use crate::error::{validation_error, AppResult};
use serde::Serialize;
use std::fmt;

/// Workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    /// Nothing has happened yet
    BackupPending,
    /// Protected environment backed up and verified
    BackupDone,
    BackupFailed,
    DiffComputed,
    /// Waiting on the operator
    AwaitingConfirmation,
    Confirmed,
    Cancelled,
    MigrationApplied,
    MigrationFailed,
    Validated,
    Completed,
}

impl UpdateStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateStage::BackupFailed
                | UpdateStage::Cancelled
                | UpdateStage::MigrationFailed
                | UpdateStage::Completed
        )
    }

    pub fn can_transition_to(self, next: UpdateStage) -> bool {
        use UpdateStage::*;
        matches!(
            (self, next),
            (BackupPending, BackupDone)
                | (BackupPending, BackupFailed)
                | (BackupDone, DiffComputed)
                | (DiffComputed, AwaitingConfirmation)
                | (AwaitingConfirmation, Confirmed)
                | (AwaitingConfirmation, Cancelled)
                | (Confirmed, MigrationApplied)
                | (Confirmed, MigrationFailed)
                | (MigrationApplied, Validated)
                | (Validated, Completed)
        )
    }

    /// Short name used in halt messages
    pub fn label(self) -> &'static str {
        match self {
            UpdateStage::BackupPending => "backup pending",
            UpdateStage::BackupDone => "backup done",
            UpdateStage::BackupFailed => "backup",
            UpdateStage::DiffComputed => "diff",
            UpdateStage::AwaitingConfirmation => "confirmation",
            UpdateStage::Confirmed => "confirmed",
            UpdateStage::Cancelled => "confirmation",
            UpdateStage::MigrationApplied => "migration applied",
            UpdateStage::MigrationFailed => "migration",
            UpdateStage::Validated => "validation",
            UpdateStage::Completed => "completed",
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current stage plus every stage visited so far
#[derive(Debug, Clone)]
pub struct StageTracker {
    trail: Vec<UpdateStage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            trail: vec![UpdateStage::BackupPending],
        }
    }

    pub fn current(&self) -> UpdateStage {
        // trail always holds at least the initial stage
        self.trail.last().copied().unwrap_or(UpdateStage::BackupPending)
    }

    pub fn advance(&mut self, next: UpdateStage) -> AppResult<()> {
        let current = self.current();
        if current.is_terminal() {
            return Err(validation_error(format!("Workflow already finished at {:?}", current)));
        }
        if !current.can_transition_to(next) {
            return Err(validation_error(format!(
                "Illegal workflow transition {:?} -> {:?}",
                current, next
            )));
        }
        self.trail.push(next);
        Ok(())
    }

    pub fn into_trail(self) -> Vec<UpdateStage> {
        self.trail
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut tracker = StageTracker::new();
        for stage in [
            UpdateStage::BackupDone,
            UpdateStage::DiffComputed,
            UpdateStage::AwaitingConfirmation,
            UpdateStage::Confirmed,
            UpdateStage::MigrationApplied,
            UpdateStage::Validated,
            UpdateStage::Completed,
        ] {
            tracker.advance(stage).unwrap();
        }
        assert!(tracker.current().is_terminal());
        assert!(tracker.advance(UpdateStage::Completed).is_err());
        assert_eq!(tracker.into_trail().len(), 8);
    }

    #[test]
    fn test_cannot_skip_backup() {
        let mut tracker = StageTracker::new();
        assert!(tracker.advance(UpdateStage::MigrationApplied).is_err());
        assert!(tracker.advance(UpdateStage::Confirmed).is_err());
        assert_eq!(tracker.current(), UpdateStage::BackupPending);
    }

    #[test]
    fn test_terminal_stages_have_no_exit() {
        for stage in [UpdateStage::BackupFailed, UpdateStage::Cancelled, UpdateStage::MigrationFailed] {
            assert!(stage.is_terminal());
            assert!(!stage.can_transition_to(UpdateStage::MigrationApplied));
            assert!(!stage.can_transition_to(UpdateStage::Completed));
        }
    }
}
