//! The backend calls the executor depends on.
//!
//! [`ComfyUIApi`] is the production implementation; tests substitute an
//! in-memory fake so retry and liveness behaviour can be driven
//! deterministically.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{HistoryEntry, QueueSnapshot};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Base URL used to build artifact download links.
    fn base_url(&self) -> &str;

    /// Enqueue a workflow and return the backend's job ID.
    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<String, ComfyUIApiError>;

    /// History entry for `job_id`, or `None` if the backend has none yet.
    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;

    /// Running and pending jobs.
    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError>;

    /// Succeeds when the backend answers its status endpoint.
    async fn ping(&self) -> Result<(), ComfyUIApiError>;
}

#[async_trait]
impl Backend for ComfyUIApi {
    fn base_url(&self) -> &str {
        self.api_url()
    }

    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<String, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id, extra).await
    }

    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.get_history(job_id).await
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.get_queue().await
    }

    async fn ping(&self) -> Result<(), ComfyUIApiError> {
        self.system_stats().await.map(|_| ())
    }
}
