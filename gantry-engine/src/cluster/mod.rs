//! Batch cluster boundary
//!
//! The engine submits jobs by name, polls them by id, and cancels them
//! when their task is retired. The trait keeps the pass logic free of
//! scheduler specifics; [`slurm`] holds the real implementation.

pub mod slurm;

pub use slurm::{SlurmCluster, SlurmConfig};

use async_trait::async_trait;
use thiserror::Error;

use gantry_core::domain::spec::JobSpec;

/// What the scheduler currently knows about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued, executing, or otherwise on its way.
    Running,
    /// Finished with a zero exit code.
    Succeeded,
    /// Finished any other way: nonzero exit, timeout, cancel, OOM.
    Failed,
    /// The scheduler has no record of this job right now.
    ///
    /// Not the same as failed: accounting can lag a finished job by
    /// minutes, so UNKNOWN is only trusted after a grace window.
    Unknown,
}

/// Errors from the scheduler boundary.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Could not reach or run the scheduler tooling; retry next pass.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    /// The scheduler looked at the submission and said no.
    #[error("submission rejected: {0}")]
    Rejected(String),
    /// Cancel was acknowledged but did not take.
    #[error("cancel failed for job {job_id}: {message}")]
    CancelFailed { job_id: String, message: String },
    /// Scheduler output that could not be parsed.
    #[error("unparseable scheduler output: {0}")]
    Malformed(String),
}

/// Batch scheduler operations the launcher needs.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Submits a job under the given name and returns the scheduler's
    /// job id.
    async fn submit(&self, job_name: &str, spec: &JobSpec) -> Result<String, ClusterError>;

    /// Polls one job.
    async fn status(&self, job_id: &str) -> Result<JobState, ClusterError>;

    /// Cancels one job. Cancelling a job the scheduler no longer knows
    /// is not an error.
    async fn cancel(&self, job_id: &str) -> Result<(), ClusterError>;

    /// Finds a job by the name it was submitted under.
    ///
    /// Used to re-attach to a job whose id was never persisted (crash
    /// between submit and write-back) instead of submitting it twice.
    async fn lookup(&self, job_name: &str) -> Result<Option<String>, ClusterError>;
}
