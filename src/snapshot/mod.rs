//! Schema Snapshot Module
//!
//! Works on snapshots captured by the introspector:
//! - Schema diff engine (comparing two environments)
//! - Integrity validator (advisory health checks)

pub mod diff;
pub mod integrity;

pub use diff::{CompareReport, DiffEngine, SchemaDiff};
pub use integrity::{IntegrityValidator, ValidationReport};
