//! Backend liveness inference.
//!
//! ComfyUI has no endpoint that says "I forgot your job". After a crash
//! or restart a submitted prompt simply stops existing, so the only way
//! to notice is to look for it everywhere it could be: if the server
//! answers but the prompt is neither queued, running, nor in history,
//! it is gone.
//!
//! An unreachable server reads as inactive, so a caller retries rather
//! than waiting forever. A queue that answers with an error status or an
//! unreadable body is skipped: history still decides.

use crate::backend::Backend;

/// Whether `job_id` is still known to the backend.
///
/// Checks, in order: the status ping, the running/pending queue, and the
/// job history. Reads only; safe to call repeatedly and concurrently.
pub async fn is_job_active(backend: &dyn Backend, job_id: &str) -> bool {
    if let Err(e) = backend.ping().await {
        tracing::warn!(job_id, error = %e, "Backend did not answer status ping");
        return false;
    }

    match backend.queue().await {
        Ok(queue) if queue.contains(job_id) => return true,
        Ok(_) => {}
        Err(e) if e.is_transport() => {
            tracing::warn!(job_id, error = %e, "Backend unreachable while reading queue");
            return false;
        }
        Err(e) => {
            tracing::debug!(job_id, error = %e, "Queue unreadable, falling back to history");
        }
    }

    match backend.history(job_id).await {
        Ok(Some(_)) => true,
        Ok(None) => {
            tracing::debug!(job_id, "Job absent from queue and history");
            false
        }
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Failed to read job history");
            false
        }
    }
}
