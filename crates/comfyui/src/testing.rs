//! Scripted in-memory [`Backend`] used by the liveness, poller and
//! executor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::api::ComfyUIApiError;
use crate::backend::Backend;
use crate::history::{HistoryEntry, QueueSnapshot};

pub const FAKE_BASE_URL: &str = "http://fake-comfy:8188";

/// What happens to the job created by one `submit` call.
#[derive(Debug, Clone)]
pub enum JobScript {
    /// The submission itself is rejected.
    RejectSubmit,
    /// Accepted, then forgotten: absent from queue and history.
    Vanish,
    /// Sits in the queue forever.
    Hang,
    /// Queued for `running_polls` history reads, then completes.
    Complete { running_polls: usize, outputs: Value },
    /// Finishes immediately with an error status.
    Fail { messages: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub workflow: Value,
    pub client_id: String,
    pub extra: Map<String, Value>,
    pub job_id: Option<String>,
}

struct JobState {
    script: JobScript,
    history_reads: usize,
}

impl JobState {
    fn is_done(&self) -> bool {
        match &self.script {
            JobScript::Complete { running_polls, .. } => self.history_reads > *running_polls,
            JobScript::Fail { .. } => true,
            _ => false,
        }
    }

    fn in_queue(&self) -> bool {
        match &self.script {
            JobScript::Hang => true,
            JobScript::Complete { .. } => !self.is_done(),
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct FakeBackend {
    scripts: Mutex<VecDeque<JobScript>>,
    jobs: Mutex<HashMap<String, JobState>>,
    submissions: Mutex<Vec<Submission>>,
    down: AtomicBool,
    ping_failing: AtomicBool,
    queue_failing: AtomicBool,
    failing_history_reads: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_scripts(scripts: impl IntoIterator<Item = JobScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Register a job directly, bypassing `submit`.
    pub fn insert_job(&self, job_id: &str, script: JobScript) {
        self.jobs.lock().unwrap().insert(
            job_id.to_string(),
            JobState {
                script,
                history_reads: 0,
            },
        );
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail only the status ping; queue and history keep answering.
    pub fn fail_ping(&self, failing: bool) {
        self.ping_failing.store(failing, Ordering::SeqCst);
    }

    /// Answer `/queue` with an error status.
    pub fn fail_queue(&self, failing: bool) {
        self.queue_failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `n` history reads fail at the transport level.
    pub fn fail_history_reads(&self, n: usize) {
        self.failing_history_reads.store(n, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn unavailable() -> ComfyUIApiError {
        ComfyUIApiError::ApiError {
            status: 503,
            body: "backend unavailable".to_string(),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn base_url(&self) -> &str {
        FAKE_BASE_URL
    }

    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<String, ComfyUIApiError> {
        self.record_call();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobScript::RejectSubmit);

        let mut submissions = self.submissions.lock().unwrap();
        let job_id = match script {
            JobScript::RejectSubmit => None,
            _ => Some(format!("job-{}", submissions.len() + 1)),
        };
        submissions.push(Submission {
            workflow: workflow.clone(),
            client_id: client_id.to_string(),
            extra: extra.clone(),
            job_id: job_id.clone(),
        });

        match job_id {
            Some(job_id) => {
                self.insert_job(&job_id, script);
                Ok(job_id)
            }
            None => Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "submission rejected".to_string(),
            }),
        }
    }

    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.record_call();
        if self.down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let failing = self.failing_history_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_history_reads.store(failing - 1, Ordering::SeqCst);
            return Err(Self::unavailable());
        }

        let mut jobs = self.jobs.lock().unwrap();
        let Some(state) = jobs.get_mut(job_id) else {
            return Ok(None);
        };
        state.history_reads += 1;

        let entry = match &state.script {
            JobScript::Complete { outputs, .. } if state.is_done() => json!({
                "status": {"status_str": "success", "completed": true, "messages": []},
                "outputs": outputs,
            }),
            JobScript::Fail { messages } => {
                let messages: Vec<Value> = messages
                    .iter()
                    .map(|m| json!(["execution_error", {"exception_message": m}]))
                    .collect();
                json!({
                    "status": {"status_str": "error", "completed": false, "messages": messages},
                    "outputs": {},
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(serde_json::from_value(entry).expect("valid fake history")))
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.record_call();
        if self.down.load(Ordering::SeqCst) || self.queue_failing.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let jobs = self.jobs.lock().unwrap();
        let running: Vec<Value> = jobs
            .iter()
            .filter(|(_, state)| state.in_queue())
            .map(|(id, _)| json!([0, id, {}, {}, []]))
            .collect();
        Ok(QueueSnapshot {
            queue_running: running,
            queue_pending: Vec::new(),
        })
    }

    async fn ping(&self) -> Result<(), ComfyUIApiError> {
        self.record_call();
        if self.down.load(Ordering::SeqCst) || self.ping_failing.load(Ordering::SeqCst) {
            Err(Self::unavailable())
        } else {
            Ok(())
        }
    }
}
