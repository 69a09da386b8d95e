//! One-shot operational commands against a ComfyUI server.

use serde::Serialize;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Running and pending prompt counts at the time of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub running: usize,
    pub pending: usize,
}

/// Interrupt whatever is executing and drop every pending prompt.
///
/// The interrupt is sent first so the running job stops before the
/// queue is cleared. Returns a summary suitable for display.
pub async fn stop_all_generations(api: &ComfyUIApi) -> Result<String, ComfyUIApiError> {
    api.interrupt().await?;
    api.clear_queue().await?;
    tracing::info!(api_url = %api.api_url(), "Interrupted execution and cleared queue");
    Ok("Stopped the running generation and cleared all pending jobs".to_string())
}

pub async fn queue_status(api: &ComfyUIApi) -> Result<QueueCounts, ComfyUIApiError> {
    let queue = api.get_queue().await?;
    Ok(QueueCounts {
        running: queue.running_count(),
        pending: queue.pending_count(),
    })
}
