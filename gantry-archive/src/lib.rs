//! Gantry Archive Client
//!
//! A type-safe HTTP client for the science archive's task and context
//! API.
//!
//! The archive is the system of record: task status lives there, not in
//! the launcher. This crate only moves JSON in and out; lifecycle rules
//! are enforced by `gantry_core::domain::task::Task` and the engine.
//!
//! # Example
//!
//! ```no_run
//! use gantry_archive::ArchiveClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ArchiveClient::new("https://archive.example.org");
//!
//!     for task in client.list_tasks("demo", None).await? {
//!         println!("{} {}", task.label(), task.status());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod contexts;
mod tasks;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the archive API
///
/// Provides methods for the endpoints the launcher needs:
/// - Context discovery (contexts, available resources)
/// - Task persistence (get, upsert, list by status)
/// - Claim leases (serialize access to a context across launchers)
/// - Result finalization (ingest staged outputs)
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    /// Base URL of the archive (e.g., "https://archive.example.org")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Optional bearer token sent with every request
    token: Option<String>,
}

impl ArchiveClient {
    /// Create a new archive client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the archive API
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
        }
    }

    /// Create a new archive client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: None,
        }
    }

    /// Attach a bearer token used to authenticate every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the archive
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Apply authentication to an outgoing request
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// Checks the status code and returns an appropriate error if the
    /// request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
