//! Hand-off of completed results to durable storage.
//!
//! The executor calls a [`ResultTransfer`] exactly once, after a job has
//! completed and before the result is returned to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::api::DEFAULT_REQUEST_TIMEOUT;
use crate::outputs::{flatten, Artifact};
use crate::result::ExecutionResult;

/// Directory name used when a result carries no job ID.
const UNKNOWN_JOB_DIR: &str = "unknown-job";

/// Folder type whose files land directly under the job directory.
const OUTPUT_FOLDER_TYPE: &str = "output";

/// Errors while relocating result files.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing unsafe artifact path: {0}")]
    UnsafeFilename(String),
}

#[async_trait]
pub trait ResultTransfer: Send + Sync {
    /// Persist or relocate the artifacts referenced by `result`.
    async fn transfer(&self, result: ExecutionResult) -> Result<ExecutionResult, TransferError>;
}

/// Leaves artifacts on the backend and returns the result unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl ResultTransfer for PassThrough {
    async fn transfer(&self, result: ExecutionResult) -> Result<ExecutionResult, TransferError> {
        Ok(result)
    }
}

/// Downloads every media artifact into `<output_dir>/<job_id>/`.
///
/// Files keep the backend's layout: `<subfolder>/<filename>` for
/// `output` files and `<type>/<subfolder>/<filename>` for `temp` or
/// `input` files, so equal filenames in different folders never
/// collide. Each artifact's `local_path` is set to the downloaded file.
/// Text outputs are left as they are.
#[derive(Debug, Clone)]
pub struct DownloadTransfer {
    client: reqwest::Client,
    output_dir: PathBuf,
    request_timeout: Duration,
}

impl DownloadTransfer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            output_dir: output_dir.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the bound on each file download.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn download(&self, artifact: &Artifact, job_dir: &Path) -> Result<PathBuf, TransferError> {
        let path = job_dir.join(relative_path(artifact)?);

        let response = self
            .client
            .get(&artifact.url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| TransferError::Download {
                url: artifact.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: artifact.url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| TransferError::Download {
                url: artifact.url.clone(),
                source,
            })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| TransferError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(url = %artifact.url, path = %path.display(), bytes = bytes.len(), "Artifact downloaded");
        Ok(path)
    }

    /// Download every artifact in `by_var` once, reusing paths for
    /// artifacts that appear under several variables.
    async fn localize(
        &self,
        by_var: &mut IndexMap<String, Vec<Artifact>>,
        job_dir: &Path,
        done: &mut HashMap<String, PathBuf>,
    ) -> Result<(), TransferError> {
        for artifact in by_var.values_mut().flat_map(|items| items.iter_mut()) {
            let path = match done.get(&artifact.url) {
                Some(path) => path.clone(),
                None => {
                    let path = self.download(artifact, job_dir).await?;
                    done.insert(artifact.url.clone(), path.clone());
                    path
                }
            };
            artifact.local_path = Some(path);
        }
        Ok(())
    }
}

#[async_trait]
impl ResultTransfer for DownloadTransfer {
    async fn transfer(&self, mut result: ExecutionResult) -> Result<ExecutionResult, TransferError> {
        let job_dir = self
            .output_dir
            .join(result.job_id.as_deref().unwrap_or(UNKNOWN_JOB_DIR));

        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|source| TransferError::Write {
                path: job_dir.clone(),
                source,
            })?;

        let mut done = HashMap::new();
        self.localize(&mut result.images_by_var, &job_dir, &mut done).await?;
        self.localize(&mut result.videos_by_var, &job_dir, &mut done).await?;
        self.localize(&mut result.audios_by_var, &job_dir, &mut done).await?;

        result.images = flatten(&result.images_by_var);
        result.videos = flatten(&result.videos_by_var);
        result.audios = flatten(&result.audios_by_var);

        tracing::info!(
            job_dir = %job_dir.display(),
            files = done.len(),
            "Result files transferred",
        );
        Ok(result)
    }
}

/// Where `artifact` goes under the job directory.
fn relative_path(artifact: &Artifact) -> Result<PathBuf, TransferError> {
    let unsafe_path = || {
        TransferError::UnsafeFilename(format!(
            "{}/{}/{}",
            artifact.folder_type, artifact.subfolder, artifact.filename
        ))
    };

    let mut path = PathBuf::new();
    let folder_type = artifact.folder_type.as_str();
    if !folder_type.is_empty() && folder_type != OUTPUT_FOLDER_TYPE {
        if !is_safe_filename(folder_type) {
            return Err(unsafe_path());
        }
        path.push(folder_type);
    }
    for part in artifact.subfolder.split(['/', '\\']).filter(|p| !p.is_empty()) {
        if !is_safe_filename(part) {
            return Err(unsafe_path());
        }
        path.push(part);
    }
    if !is_safe_filename(&artifact.filename) {
        return Err(unsafe_path());
    }
    path.push(&artifact.filename);
    Ok(path)
}

/// Plain file names only: no separators, no parent references.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':'])
}
