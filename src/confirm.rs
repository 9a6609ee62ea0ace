//! Human confirmation gate
//!
//! Destructive actions against protected environments block until the
//! operator types an exact phrase. The prompt has no timeout.

use crate::error::{AppError, AppResult};
use std::io::{BufRead, Write};

pub trait ConfirmationProvider: Send + Sync {
    /// Show `prompt` and return whatever the operator entered, minus the line ending
    fn ask(&self, prompt: &str) -> AppResult<String>;
}

/// Require the exact literal `phrase`; anything else cancels `action`
pub fn require_phrase(
    provider: &dyn ConfirmationProvider,
    action: &str,
    phrase: &str,
) -> AppResult<()> {
    let answer = provider.ask(&format!("Type '{}' to confirm {}: ", phrase, action))?;
    if answer == phrase {
        Ok(())
    } else {
        tracing::info!("{} cancelled", action);
        Err(AppError::ConfirmationDenied(action.to_string()))
    }
}

/// Reads the answer from stdin; the prompt goes to stderr
pub struct TerminalConfirmation;

impl ConfirmationProvider for TerminalConfirmation {
    fn ask(&self, prompt: &str) -> AppResult<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "\n⚠️  {}", prompt)?;
        stderr.flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            // EOF is never a confirmation
            return Ok(String::new());
        }
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedConfirmation;
    use super::*;

    #[test]
    fn test_exact_phrase_confirms() {
        let provider = ScriptedConfirmation::new(["RESTORE PRODUCTION"]);
        assert!(require_phrase(&provider, "restore", "RESTORE PRODUCTION").is_ok());
        assert_eq!(provider.prompts().len(), 1);
        assert!(provider.prompts()[0].contains("RESTORE PRODUCTION"));
    }

    #[test]
    fn test_variants_are_denied() {
        for answer in ["restore production", "RESTORE PRODUCTION ", " RESTORE PRODUCTION", "yes", ""] {
            let provider = ScriptedConfirmation::new([answer]);
            let err = require_phrase(&provider, "restore", "RESTORE PRODUCTION").unwrap_err();
            assert!(matches!(err, AppError::ConfirmationDenied(_)), "accepted {answer:?}");
        }
    }
}
