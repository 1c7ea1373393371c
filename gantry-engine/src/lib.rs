//! Gantry Engine
//!
//! The launcher pass: discover data contexts in the archive, reconcile
//! each one against its recorded task, and advance every actionable
//! task exactly one lifecycle step (submit, poll, or finalize).
//!
//! The engine talks to the outside world through four seams:
//! - [`Archive`] - task persistence and context discovery
//! - [`Cluster`] - batch job submission and polling
//! - [`SpecBuilder`] - turns a context into a concrete job spec
//! - [`Uploader`] - moves finished results into the archive record
//!
//! All four are traits so the pass logic is testable without a real
//! archive or scheduler.

pub mod archive;
pub mod builder;
pub mod cluster;
pub mod config;
pub mod launcher;
pub mod summary;
pub mod uploader;

// Re-export the types most callers need
pub use archive::{Archive, ArchiveError};
pub use builder::{BuilderRegistry, Evaluation, Granularity, SpecBuilder, TemplateBuilder, TemplateSpec};
pub use cluster::{Cluster, ClusterError, JobState, SlurmCluster, SlurmConfig};
pub use config::EngineConfig;
pub use launcher::Launcher;
pub use summary::{Outcome, PassSummary};
pub use uploader::{ArchiveUploader, UploadError, Uploader};
