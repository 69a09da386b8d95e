//! Subcommand implementations. Each returns a JSON value for `main` to
//! print.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use genrelay_comfyui::config::ExecutorConfig;
use genrelay_comfyui::executor::ResilientExecutor;
use genrelay_comfyui::ops;
use genrelay_comfyui::result::ExecutionResult;
use genrelay_comfyui::transfer::DownloadTransfer;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

/// Execute `workflow` until it reaches a terminal status or `cancel`
/// fires.
pub async fn run(
    config: ExecutorConfig,
    workflow: &Path,
    params: &Map<String, Value>,
    output_dir: Option<PathBuf>,
    cancel: &CancellationToken,
) -> ExecutionResult {
    let request_timeout = config.request_timeout;
    let mut executor = ResilientExecutor::new(config);
    if let Some(dir) = output_dir {
        let transfer = DownloadTransfer::new(dir).with_timeout(request_timeout);
        executor = executor.with_transfer(Arc::new(transfer));
    }

    tracing::info!(
        workflow = %workflow.display(),
        base_url = %executor.config().base_url,
        params = params.len(),
        "Running workflow",
    );
    executor.execute_with_cancel(workflow, params, cancel).await
}

pub async fn stop(config: &ExecutorConfig) -> anyhow::Result<Value> {
    let summary = ops::stop_all_generations(&config.api()).await?;
    Ok(json!({ "message": summary }))
}

pub async fn queue(config: &ExecutorConfig) -> anyhow::Result<Value> {
    let counts = ops::queue_status(&config.api()).await?;
    Ok(serde_json::to_value(counts)?)
}
