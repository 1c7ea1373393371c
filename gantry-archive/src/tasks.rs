//! Task persistence and claim endpoints

use crate::ArchiveClient;
use crate::error::{ClientError, Result};
use gantry_core::domain::status::TaskStatus;
use gantry_core::domain::task::Task;
use gantry_core::dto::claim::{ClaimRequest, ClaimResponse, ReleaseRequest};
use reqwest::StatusCode;

impl ArchiveClient {
    // =============================================================================
    // Task Persistence
    // =============================================================================

    /// Get a task by label
    ///
    /// # Arguments
    /// * `label` - The task label (context label)
    ///
    /// # Returns
    /// The task record, or `None` when the archive has never seen one
    /// for this label.
    pub async fn get_task(&self, label: &str) -> Result<Option<Task>> {
        let url = format!("{}/api/tasks/{}", self.base_url(), label);
        let response = self.authorize(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Upsert a task record
    ///
    /// The archive stores whatever is sent; lifecycle legality is the
    /// caller's job. Last write wins.
    pub async fn put_task(&self, task: &Task) -> Result<()> {
        let url = format!("{}/api/tasks/{}", self.base_url(), task.label());
        let response = self
            .authorize(self.client.put(&url))
            .json(task)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// List a project's tasks, optionally filtered by status
    ///
    /// # Arguments
    /// * `project` - The project identifier
    /// * `status` - Restrict to one lifecycle status when given
    pub async fn list_tasks(&self, project: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let url = format!("{}/api/projects/{}/tasks", self.base_url(), project);
        let mut request = self.authorize(self.client.get(&url));
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Claim Leases
    // =============================================================================

    /// Try to claim a context for exclusive processing
    ///
    /// # Arguments
    /// * `label` - The context label to claim
    /// * `owner` - Identity of the claiming launcher
    /// * `lease_seconds` - How long the claim survives without a release
    ///
    /// # Returns
    /// `true` when the claim was granted, `false` when another owner
    /// holds a live claim.
    pub async fn claim_task(&self, label: &str, owner: &str, lease_seconds: u64) -> Result<bool> {
        let url = format!("{}/api/tasks/{}/claim", self.base_url(), label);
        let response = self
            .authorize(self.client.post(&url))
            .json(&ClaimRequest {
                owner: owner.to_string(),
                lease_seconds,
            })
            .send()
            .await?;

        // A contended claim is an answer, not an error.
        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        let verdict: ClaimResponse = self.handle_response(response).await?;
        Ok(verdict.claimed)
    }

    /// Release a claim before its lease runs out
    ///
    /// Releasing a claim that already expired is fine; the archive
    /// answers success either way.
    pub async fn release_task(&self, label: &str, owner: &str) -> Result<()> {
        let url = format!("{}/api/tasks/{}/release", self.base_url(), label);
        let response = self
            .authorize(self.client.post(&url))
            .json(&ReleaseRequest {
                owner: owner.to_string(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Finalization
    // =============================================================================

    /// Ask the archive to ingest the staged outputs for a task
    ///
    /// Invoked once a job finished successfully and its results sit in
    /// the staging area the job wrote to. The archive moves them into
    /// the permanent record.
    ///
    /// # Errors
    /// 4xx responses mean the staged results were rejected and will be
    /// rejected again; 5xx and transport errors are worth retrying.
    pub async fn finalize_task(&self, label: &str) -> Result<()> {
        let url = format!("{}/api/tasks/{}/finalize", self.base_url(), label);
        let response = self.authorize(self.client.post(&url)).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::NotFound(format!("task {}: {}", label, text)));
        }
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), text));
        }
        Ok(())
    }
}
