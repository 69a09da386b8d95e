//! History polling until a job resolves.

use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::outputs::aggregate_into;
use crate::result::{ExecutionResult, ExecutionStatus};

/// Poll `/history` for `job_id` until it completes, fails, or `timeout`
/// elapses.
///
/// A `None` or zero `timeout` polls without bound. A job missing from
/// history, or a failed history read, is treated as still running; only
/// the liveness probe decides that a job has disappeared. Backend
/// errors are returned as `Error` results and never retried here.
pub async fn wait_for_result(
    backend: &dyn Backend,
    job_id: &str,
    client_id: &str,
    timeout: Option<Duration>,
    poll_interval: Duration,
    output_var_map: &IndexMap<String, String>,
) -> ExecutionResult {
    let started = Instant::now();
    let timeout = timeout.filter(|t| !t.is_zero());
    let mut result = ExecutionResult::processing(job_id);
    result.client_id = Some(client_id.to_string());

    tracing::debug!(job_id, client_id, ?timeout, "Waiting for job result");

    loop {
        if let Some(limit) = timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                tracing::debug!(job_id, ?elapsed, "Result wait timed out");
                result.status = ExecutionStatus::Timeout;
                result.duration = elapsed;
                return result;
            }
        }

        match backend.history(job_id).await {
            Ok(Some(entry)) if entry.is_error() => {
                result.status = ExecutionStatus::Error;
                result.message = Some(entry.error_message());
                result.duration = started.elapsed();
                tracing::warn!(job_id, message = ?result.message, "Job reported an execution error");
                return result;
            }
            Ok(Some(entry)) => {
                if let Some(outputs) = entry.outputs {
                    aggregate_into(&mut result, &outputs, backend.base_url(), output_var_map);
                    result.raw_outputs = outputs;
                    result.status = ExecutionStatus::Completed;
                    result.duration = started.elapsed();
                    tracing::info!(
                        job_id,
                        images = result.images.len(),
                        videos = result.videos.len(),
                        audios = result.audios.len(),
                        texts = result.texts.len(),
                        "Job completed",
                    );
                    return result;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(job_id, error = %e, "History read failed, will retry");
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
