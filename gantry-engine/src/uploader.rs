//! Result finalization boundary
//!
//! A finished job leaves its outputs in a staging area; the uploader
//! asks the archive to ingest them into the permanent record. Split
//! from [`crate::archive::Archive`] because finalization has its own
//! failure semantics: retryable failures leave the task waiting,
//! fatal ones fail it for good.

use async_trait::async_trait;
use thiserror::Error;

use gantry_archive::ArchiveClient;
use gantry_core::domain::task::Task;

/// Why a finalization did not complete.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Worth retrying next pass; the task stays where it is.
    #[error("finalization deferred: {0}")]
    Retryable(String),
    /// Will never succeed as staged; the task fails for good.
    #[error("finalization rejected: {0}")]
    Fatal(String),
}

/// Moves a finished task's staged outputs into the archive record.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn finalize(&self, task: &Task) -> Result<(), UploadError>;
}

/// Uploader backed by the archive's own ingest endpoint.
pub struct ArchiveUploader {
    client: ArchiveClient,
}

impl ArchiveUploader {
    pub fn new(client: ArchiveClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Uploader for ArchiveUploader {
    async fn finalize(&self, task: &Task) -> Result<(), UploadError> {
        self.client.finalize_task(&task.label()).await.map_err(|e| {
            if e.is_transient() {
                UploadError::Retryable(e.to_string())
            } else {
                UploadError::Fatal(e.to_string())
            }
        })
    }
}
