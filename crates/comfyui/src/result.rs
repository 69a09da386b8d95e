//! Execution result and job handle types.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::outputs::Artifact;

/// Identifiers of one submitted attempt.
///
/// A fresh pair is created for every submission and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    /// Backend-assigned prompt ID.
    pub job_id: String,
    /// Client session ID sent with the submission.
    pub client_id: String,
}

/// Lifecycle status of an [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Processing,
    Completed,
    Error,
    Timeout,
}

/// Outcome of waiting for (or executing) a job.
///
/// The `*_by_var` maps key artifacts by output variable name (falling
/// back to the node ID); the flat lists concatenate them in map order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Human-readable failure description; `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Seed used by the final attempt, if the workflow had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Number of submission attempts the executor made.
    pub attempts: u32,
    /// Node ID to raw output record, exactly as the backend reported it.
    pub raw_outputs: Map<String, Value>,
    pub images: Vec<Artifact>,
    pub videos: Vec<Artifact>,
    pub audios: Vec<Artifact>,
    pub texts: Vec<String>,
    pub images_by_var: IndexMap<String, Vec<Artifact>>,
    pub videos_by_var: IndexMap<String, Vec<Artifact>>,
    pub audios_by_var: IndexMap<String, Vec<Artifact>>,
    pub texts_by_var: IndexMap<String, Vec<String>>,
}

impl ExecutionResult {
    /// A fresh `Processing` result for the given job.
    pub fn processing(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::with_status(ExecutionStatus::Processing)
        }
    }

    /// A terminal `Error` result carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(ExecutionStatus::Error)
        }
    }

    fn with_status(status: ExecutionStatus) -> Self {
        Self {
            status,
            message: None,
            duration: Duration::ZERO,
            job_id: None,
            client_id: None,
            seed: None,
            attempts: 0,
            raw_outputs: Map::new(),
            images: Vec::new(),
            videos: Vec::new(),
            audios: Vec::new(),
            texts: Vec::new(),
            images_by_var: IndexMap::new(),
            videos_by_var: IndexMap::new(),
            audios_by_var: IndexMap::new(),
            texts_by_var: IndexMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
