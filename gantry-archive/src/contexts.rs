//! Context discovery endpoints

use crate::ArchiveClient;
use crate::error::Result;
use gantry_core::domain::context::DataContext;

impl ArchiveClient {
    /// List the data contexts of a project
    ///
    /// One context per (session or scan, pipeline) pair the project has
    /// enabled; the archive already knows which pipelines apply where,
    /// so each context arrives with its spec id filled in.
    pub async fn list_contexts(&self, project: &str) -> Result<Vec<DataContext>> {
        let url = format!("{}/api/projects/{}/contexts", self.base_url(), project);
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_response(response).await
    }

    /// List the resource names available on a context
    ///
    /// Resources are the named file collections attached to a session
    /// or scan (e.g. "DICOM", "NIFTI"). Builders compare this list
    /// against the inputs a pipeline needs.
    pub async fn list_resources(&self, label: &str) -> Result<Vec<String>> {
        let url = format!("{}/api/contexts/{}/resources", self.base_url(), label);
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_response(response).await
    }
}
