//! Resilient workflow execution against a crash-prone ComfyUI backend.
//!
//! [`ResilientExecutor::execute`] drives one workflow to a terminal
//! [`ExecutionResult`]:
//!
//! ```text
//! Start -> Submitting -> Monitoring -> Completed -> transfer, return
//!              ^    |               -> Errored   -> return (no retry)
//!              |    |               -> Failed(disappeared | timed out)
//!              |    +-> Failed(submission)            |
//!              +------- next attempt <----------------+
//!                       (or "Max retries exceeded")
//! ```
//!
//! A `Failed` attempt is retried only when its [`ExecutionFailure`] is
//! retryable; anything else ends the execution.
//!
//! Every attempt submits a freshly seeded copy of the workflow under a
//! new client ID. While monitoring, liveness is checked before each
//! completion check so a result is never read for a job the backend
//! has already forgotten.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use genrelay_core::error::CoreError;
use genrelay_core::metadata::{extract_output_var_map, load_metadata};
use genrelay_core::params::apply_params;
use genrelay_core::seed::randomize_seed;
use genrelay_core::template::{load_template, JobTemplate};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApiError;
use crate::backend::Backend;
use crate::config::ExecutorConfig;
use crate::liveness::is_job_active;
use crate::poller::wait_for_result;
use crate::result::{ExecutionResult, ExecutionStatus, JobHandle};
use crate::transfer::{PassThrough, ResultTransfer, TransferError};

/// Message of the terminal result once the attempt budget is spent.
pub const MAX_RETRIES_MESSAGE: &str = "Max retries exceeded";

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Why an attempt or a whole execution did not complete.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionFailure {
    /// Missing or invalid template, metadata or parameters. Terminal.
    #[error("Invalid input: {0}")]
    Input(#[from] CoreError),

    /// The backend rejected or never answered the submission. Retried.
    #[error("Submission failed: {0}")]
    Submission(#[source] ComfyUIApiError),

    /// The job vanished from status, queue and history. Retried.
    #[error("Job {job_id} disappeared from the backend")]
    BackendDisappeared { job_id: String },

    /// The backend ran the job and reported an error. Terminal.
    #[error("{0}")]
    Workflow(String),

    /// Monitoring one attempt exceeded the per-attempt ceiling. Retried.
    #[error("Job {job_id} exceeded the {ceiling:?} attempt ceiling")]
    GlobalTimeout { job_id: String, ceiling: Duration },

    /// Every attempt in the budget was used. Terminal.
    #[error("Max retries exceeded")]
    RetriesExhausted { attempts: u32 },

    /// The caller cancelled the execution. Terminal.
    #[error("Execution cancelled")]
    Cancelled,

    /// The job completed but its files could not be transferred. Terminal.
    #[error("Result transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl ExecutionFailure {
    /// Whether another attempt may fix this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Submission(_) | Self::BackendDisappeared { .. } | Self::GlobalTimeout { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Retry bookkeeping
// ---------------------------------------------------------------------------

/// Attempt budget for one `execute` call.
///
/// Invariant: `attempt_count <= max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt_count: u32,
    max_attempts: u32,
    attempt_ceiling: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, attempt_ceiling: Duration) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            attempt_ceiling,
        }
    }

    /// Start the next attempt, returning its 1-based number, or `None`
    /// when the budget is spent.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.attempt_count)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Wall-clock bound on monitoring a single attempt.
    pub fn attempt_ceiling(&self) -> Duration {
        self.attempt_ceiling
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// A template with parameters applied, ready to be seeded and submitted.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub workflow: JobTemplate,
    /// Output node ID to caller-facing variable name.
    pub output_var_map: IndexMap<String, String>,
}

/// Run the Start-state collaborators: load, validate, parameterize.
pub fn prepare_job(
    template_path: &Path,
    params: &Map<String, Value>,
) -> Result<PreparedJob, CoreError> {
    let template = load_template(template_path)?;
    let metadata = load_metadata(&template)?;
    let workflow = apply_params(&template, &metadata, params)?;
    let output_var_map = extract_output_var_map(&metadata);
    Ok(PreparedJob {
        workflow,
        output_var_map,
    })
}

/// States of one execution after Start. Each variant carries only what
/// its transition needs.
#[derive(Debug)]
enum AttemptState {
    Submitting,
    Monitoring { handle: JobHandle, seed: Option<u64> },
    Completed(ExecutionResult),
    Errored(ExecutionResult),
    Failed(ExecutionFailure),
}

/// Submits workflows and shepherds them through backend restarts.
///
/// Holds no per-execution state, so one executor can serve many
/// concurrent `execute` calls.
pub struct ResilientExecutor {
    backend: Arc<dyn Backend>,
    transfer: Arc<dyn ResultTransfer>,
    config: ExecutorConfig,
}

impl ResilientExecutor {
    /// Executor talking HTTP to `config.base_url`, leaving result files
    /// on the backend.
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_backend(Arc::new(config.api()), config)
    }

    /// Executor over an arbitrary [`Backend`].
    pub fn with_backend(backend: Arc<dyn Backend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            transfer: Arc::new(PassThrough),
            config,
        }
    }

    /// Replace the step that persists completed results.
    pub fn with_transfer(mut self, transfer: Arc<dyn ResultTransfer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Load the workflow at `template_path`, apply `params`, and run it
    /// to a terminal result. Never panics and never returns a
    /// non-terminal status.
    pub async fn execute(&self, template_path: &Path, params: &Map<String, Value>) -> ExecutionResult {
        let started = Instant::now();
        match prepare_job(template_path, params) {
            Ok(job) => self.run(&job, started).await,
            Err(e) => {
                let failure = ExecutionFailure::Input(e);
                tracing::error!(
                    path = %template_path.display(),
                    error = %failure,
                    "Workflow could not be prepared",
                );
                self.failed(&failure, started, 0)
            }
        }
    }

    /// Like [`execute`](Self::execute), but gives up as soon as `cancel`
    /// fires. In-flight backend calls are dropped; an abandoned job is
    /// left for the backend to reclaim.
    pub async fn execute_with_cancel(
        &self,
        template_path: &Path,
        params: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(path = %template_path.display(), "Execution cancelled");
                self.failed(&ExecutionFailure::Cancelled, started, 0)
            }
            result = self.execute(template_path, params) => result,
        }
    }

    /// Run an already prepared job through the retry state machine.
    pub async fn execute_prepared(&self, job: &PreparedJob) -> ExecutionResult {
        self.run(job, Instant::now()).await
    }

    async fn run(&self, job: &PreparedJob, started: Instant) -> ExecutionResult {
        let mut retry = RetryState::new(self.config.max_attempts, self.config.attempt_ceiling);
        let mut state = AttemptState::Submitting;

        loop {
            state = match state {
                AttemptState::Submitting => {
                    let Some(attempt) = retry.begin_attempt() else {
                        let failure = ExecutionFailure::RetriesExhausted {
                            attempts: retry.attempt_count(),
                        };
                        tracing::error!(attempts = retry.attempt_count(), "Giving up on workflow");
                        return self.failed(&failure, started, retry.attempt_count());
                    };
                    self.submit(job, attempt, retry.max_attempts()).await
                }

                AttemptState::Monitoring { handle, seed } => {
                    match self.monitor(handle, job, retry.attempt_ceiling()).await {
                        AttemptState::Completed(result) => {
                            AttemptState::Completed(self.stamp(result, seed, &retry, started))
                        }
                        AttemptState::Errored(result) => {
                            AttemptState::Errored(self.stamp(result, seed, &retry, started))
                        }
                        other => other,
                    }
                }

                AttemptState::Completed(result) => return self.finish(result).await,

                AttemptState::Errored(result) => {
                    let failure =
                        ExecutionFailure::Workflow(result.message.clone().unwrap_or_default());
                    tracing::error!(
                        job_id = ?result.job_id,
                        attempt = retry.attempt_count(),
                        error = %failure,
                        "Workflow failed on the backend, not retrying",
                    );
                    return result;
                }

                AttemptState::Failed(failure) if failure.is_retryable() => {
                    tracing::warn!(
                        attempt = retry.attempt_count(),
                        max_attempts = retry.max_attempts(),
                        error = %failure,
                        "Attempt failed, retrying with a new seed",
                    );
                    let pause = self.pause_after(&failure);
                    if !retry.is_exhausted() && !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    AttemptState::Submitting
                }

                AttemptState::Failed(failure) => {
                    tracing::error!(
                        attempt = retry.attempt_count(),
                        error = %failure,
                        "Attempt failed, not retrying",
                    );
                    return self.failed(&failure, started, retry.attempt_count());
                }
            };
        }
    }

    /// Seed a fresh copy of the workflow and enqueue it under a new
    /// client ID.
    async fn submit(&self, job: &PreparedJob, attempt: u32, max_attempts: u32) -> AttemptState {
        let (workflow, seed) = randomize_seed(&job.workflow);
        let client_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            attempt,
            max_attempts,
            client_id = %client_id,
            seed = ?seed,
            "Submitting workflow",
        );

        match self
            .backend
            .submit(&workflow.to_value(), &client_id, &self.config.prompt_extra())
            .await
        {
            Ok(job_id) => AttemptState::Monitoring {
                handle: JobHandle { job_id, client_id },
                seed,
            },
            Err(e) => AttemptState::Failed(ExecutionFailure::Submission(e)),
        }
    }

    /// Watch one live job until it resolves, vanishes, or the attempt
    /// ceiling elapses.
    async fn monitor(&self, handle: JobHandle, job: &PreparedJob, ceiling: Duration) -> AttemptState {
        match tokio::time::timeout(ceiling, self.watch(&handle, job)).await {
            Ok(state) => state,
            Err(_) => AttemptState::Failed(ExecutionFailure::GlobalTimeout {
                job_id: handle.job_id,
                ceiling,
            }),
        }
    }

    async fn watch(&self, handle: &JobHandle, job: &PreparedJob) -> AttemptState {
        let backend = self.backend.as_ref();
        loop {
            if !is_job_active(backend, &handle.job_id).await {
                return AttemptState::Failed(ExecutionFailure::BackendDisappeared {
                    job_id: handle.job_id.clone(),
                });
            }

            let result = wait_for_result(
                backend,
                &handle.job_id,
                &handle.client_id,
                Some(self.config.check_timeout),
                self.config.check_timeout,
                &job.output_var_map,
            )
            .await;

            match result.status {
                ExecutionStatus::Completed => return AttemptState::Completed(result),
                ExecutionStatus::Error => return AttemptState::Errored(result),
                ExecutionStatus::Timeout | ExecutionStatus::Processing => {
                    tracing::trace!(job_id = %handle.job_id, "Job still running");
                }
            }

            tokio::time::sleep(self.config.poll_pause).await;
        }
    }

    /// Back-off before the next attempt. A vanished job is resubmitted
    /// at once.
    fn pause_after(&self, failure: &ExecutionFailure) -> Duration {
        match failure {
            ExecutionFailure::Submission(_) => self.config.submit_backoff,
            ExecutionFailure::GlobalTimeout { .. } => self.config.poll_pause,
            _ => Duration::ZERO,
        }
    }

    /// Hand a completed result to the transfer step.
    async fn finish(&self, result: ExecutionResult) -> ExecutionResult {
        let job_id = result.job_id.clone();
        match self.transfer.transfer(result.clone()).await {
            Ok(transferred) => {
                tracing::info!(
                    job_id = ?job_id,
                    attempts = transferred.attempts,
                    duration = ?transferred.duration,
                    "Workflow completed",
                );
                transferred
            }
            Err(e) => {
                let failure = ExecutionFailure::Transfer(e);
                tracing::error!(job_id = ?job_id, error = %failure, "Result transfer failed");
                ExecutionResult {
                    status: ExecutionStatus::Error,
                    message: Some(failure.to_string()),
                    ..result
                }
            }
        }
    }

    /// Record attempt metadata and total elapsed time on a terminal result.
    fn stamp(
        &self,
        mut result: ExecutionResult,
        seed: Option<u64>,
        retry: &RetryState,
        started: Instant,
    ) -> ExecutionResult {
        result.seed = seed;
        result.attempts = retry.attempt_count();
        result.duration = started.elapsed();
        result
    }

    fn failed(&self, failure: &ExecutionFailure, started: Instant, attempts: u32) -> ExecutionResult {
        ExecutionResult {
            duration: started.elapsed(),
            attempts,
            ..ExecutionResult::error(failure.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
