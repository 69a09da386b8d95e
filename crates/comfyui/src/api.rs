//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history and queue
//! inspection, liveness ping, interruption) using [`reqwest`]. Every
//! call is a single request: retry policy belongs to the executor.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::history::{HistoryEntry, QueueSnapshot};

/// Timeout applied to every request unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the `/system_stats` liveness ping.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
    ping_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation errors reported alongside the submission.
    #[serde(default)]
    pub node_errors: Option<Value>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// `/prompt` answered 2xx but without a `prompt_id`.
    #[error("ComfyUI accepted the workflow but returned no prompt_id: {0}")]
    MissingPromptId(String),

    /// A 2xx response body did not have the expected shape.
    #[error("Unexpected response payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ComfyUIApiError {
    /// The server could not be reached or stopped answering mid-request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`. A trailing
    ///   slash is stripped.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Override the general request timeout and the liveness ping timeout.
    pub fn with_timeouts(mut self, request_timeout: Duration, ping_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.ping_timeout = ping_timeout;
        self
    }

    /// HTTP API base URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Top-level keys of `extra` are merged into the request
    /// body (e.g. `extra_data` carrying an API key). Returns the
    /// server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<String, ComfyUIApiError> {
        let mut body = Map::new();
        body.insert("prompt".to_string(), workflow.clone());
        body.insert("client_id".to_string(), Value::String(client_id.to_string()));
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        let raw: Value = Self::parse_response(response).await?;
        let parsed: SubmitResponse = serde_json::from_value(raw.clone())?;

        match parsed.prompt_id.filter(|id| !id.is_empty()) {
            Some(prompt_id) => {
                tracing::info!(
                    prompt_id = %prompt_id,
                    client_id,
                    queue_number = parsed.number,
                    "Workflow submitted to ComfyUI",
                );
                Ok(prompt_id)
            }
            None => Err(ComfyUIApiError::MissingPromptId(raw.to_string())),
        }
    }

    /// Retrieve the history entry for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. ComfyUI answers with
    /// an object keyed by prompt ID, which is empty while the prompt is
    /// still queued or running. Returns `None` in that case.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let mut history: Map<String, Value> = Self::parse_response(response).await?;
        match history.remove(prompt_id) {
            Some(entry) => Ok(Some(serde_json::from_value(entry)?)),
            None => Ok(None),
        }
    }

    /// Fetch the current execution queue (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Lightweight liveness check against `GET /system_stats`.
    ///
    /// Uses the short ping timeout so a hung server is reported as
    /// unreachable quickly.
    pub async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(self.ping_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Interrupt the currently running execution immediately.
    ///
    /// Sends a `POST /interrupt` request. This does not target a
    /// specific prompt -- it interrupts whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Remove every pending prompt from the queue.
    pub async fn clear_queue(&self) -> Result<(), ComfyUIApiError> {
        self.post_queue(&serde_json::json!({ "clear": true })).await
    }

    // ---- private helpers ----

    async fn post_queue(&self, body: &Value) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
