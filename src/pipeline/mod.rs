//! Safe Update Pipeline
//!
//! The guarded path for changing the protected environment:
//!
//! 1. **Backup**: full dump of the protected environment, verified
//! 2. **Diff**: reference vs protected, logged for the operator
//! 3. **Confirm**: exact apply phrase
//! 4. **Migrate**: latest revision, guarded by the verified backup
//! 5. **Validate**: advisory integrity report

pub mod orchestrator;
pub mod types;

pub use orchestrator::SafeUpdate;
