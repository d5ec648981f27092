//! Service runtime for scheduled merge exports.
//!
//! Wires configuration, the export job and the cron scheduler together.

pub mod config_loader;
pub mod job;
pub mod scheduler;

// Re-export key types
pub use config_loader::{FhirSettings, JobSettings, ScheduleSettings, Settings, StorageKind, StorageSettings};
pub use job::{MergeExportJob, RunSummary};
pub use scheduler::{build_scheduler, serve};
