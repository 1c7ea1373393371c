//! Archive boundary
//!
//! The engine never talks HTTP directly; it goes through the [`Archive`]
//! trait so passes can run against an in-memory fake in tests. The real
//! implementation wraps [`gantry_archive::ArchiveClient`].

use async_trait::async_trait;
use thiserror::Error;

use gantry_archive::{ArchiveClient, ClientError};
use gantry_core::domain::context::DataContext;
use gantry_core::domain::status::TaskStatus;
use gantry_core::domain::task::Task;

/// Errors the engine distinguishes when talking to the archive.
///
/// Unavailable means "try again next pass"; Rejected means the same
/// call will keep failing until a human looks at it.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive unavailable: {0}")]
    Unavailable(String),
    #[error("archive rejected request: {0}")]
    Rejected(String),
}

impl From<ClientError> for ArchiveError {
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Rejected(err.to_string())
        }
    }
}

/// Everything the launcher needs from the system of record.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Lists the data contexts of a project, one per (data, pipeline)
    /// pair the project has enabled.
    async fn list_contexts(&self, project: &str) -> Result<Vec<DataContext>, ArchiveError>;

    /// Fetches the task recorded for a label, if any.
    async fn get_task(&self, label: &str) -> Result<Option<Task>, ArchiveError>;

    /// Upserts a task record. Last write wins.
    async fn put_task(&self, task: &Task) -> Result<(), ArchiveError>;

    /// Lists a project's tasks, optionally restricted to one status.
    async fn list_tasks(
        &self,
        project: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, ArchiveError>;

    /// Names of the resources available on a context.
    async fn get_resources(&self, label: &str) -> Result<Vec<String>, ArchiveError>;

    /// Tries to claim a context for exclusive processing. `false` means
    /// another launcher holds a live claim.
    async fn claim(&self, label: &str, owner: &str, lease_seconds: u64)
    -> Result<bool, ArchiveError>;

    /// Releases a claim early. Releasing an expired claim is harmless.
    async fn release(&self, label: &str, owner: &str) -> Result<(), ArchiveError>;
}

#[async_trait]
impl Archive for ArchiveClient {
    async fn list_contexts(&self, project: &str) -> Result<Vec<DataContext>, ArchiveError> {
        Ok(ArchiveClient::list_contexts(self, project).await?)
    }

    async fn get_task(&self, label: &str) -> Result<Option<Task>, ArchiveError> {
        Ok(ArchiveClient::get_task(self, label).await?)
    }

    async fn put_task(&self, task: &Task) -> Result<(), ArchiveError> {
        Ok(ArchiveClient::put_task(self, task).await?)
    }

    async fn list_tasks(
        &self,
        project: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, ArchiveError> {
        Ok(ArchiveClient::list_tasks(self, project, status).await?)
    }

    async fn get_resources(&self, label: &str) -> Result<Vec<String>, ArchiveError> {
        Ok(ArchiveClient::list_resources(self, label).await?)
    }

    async fn claim(
        &self,
        label: &str,
        owner: &str,
        lease_seconds: u64,
    ) -> Result<bool, ArchiveError> {
        Ok(ArchiveClient::claim_task(self, label, owner, lease_seconds).await?)
    }

    async fn release(&self, label: &str, owner: &str) -> Result<(), ArchiveError> {
        Ok(ArchiveClient::release_task(self, label, owner).await?)
    }
}
