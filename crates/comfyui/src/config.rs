//! Executor configuration loaded from environment variables.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::api::{ComfyUIApi, DEFAULT_PING_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

/// Default ComfyUI base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8188";

/// Submission attempts per `execute` call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Wall-clock ceiling on monitoring a single attempt (20 minutes).
pub const DEFAULT_ATTEMPT_CEILING: Duration = Duration::from_secs(20 * 60);

/// Back-off after a rejected submission.
pub const DEFAULT_SUBMIT_BACKOFF: Duration = Duration::from_secs(5);

/// Pause between monitoring iterations.
pub const DEFAULT_POLL_PAUSE: Duration = Duration::from_secs(2);

/// Bound on each non-blocking completion check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for one ComfyUI backend and the executor's retry policy.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base HTTP URL of the ComfyUI server.
    pub base_url: String,
    /// Optional comfy.org API key forwarded with each submission.
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub attempt_ceiling: Duration,
    pub submit_backoff: Duration,
    pub poll_pause: Duration,
    pub check_timeout: Duration,
    pub ping_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_ceiling: DEFAULT_ATTEMPT_CEILING,
            submit_backoff: DEFAULT_SUBMIT_BACKOFF,
            poll_pause: DEFAULT_POLL_PAUSE,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `COMFYUI_BASE_URL`              | `http://127.0.0.1:8188` |
    /// | `COMFYUI_API_KEY`               | unset                   |
    /// | `EXECUTOR_MAX_ATTEMPTS`         | `5`                     |
    /// | `EXECUTOR_ATTEMPT_CEILING_SECS` | `1200`                  |
    /// | `EXECUTOR_SUBMIT_BACKOFF_SECS`  | `5`                     |
    /// | `EXECUTOR_POLL_PAUSE_SECS`      | `2`                     |
    /// | `EXECUTOR_CHECK_TIMEOUT_SECS`   | `1`                     |
    /// | `EXECUTOR_PING_TIMEOUT_SECS`    | `2`                     |
    /// | `EXECUTOR_REQUEST_TIMEOUT_SECS` | `30`                    |
    ///
    /// Unparseable values fall back to the default with a warning, as do
    /// zero timeouts and a zero ceiling.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let base_url = lookup("COMFYUI_BASE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.base_url);

        let api_key = lookup("COMFYUI_API_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let max_attempts = match lookup("EXECUTOR_MAX_ATTEMPTS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(value = %raw, "Invalid EXECUTOR_MAX_ATTEMPTS, using default");
                    defaults.max_attempts
                }
            },
            None => defaults.max_attempts,
        };

        // Pauses may be zero; timeouts and the ceiling must not be.
        let secs = |key: &str, default: Duration, allow_zero: bool| match lookup(key) {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && (v > 0.0 || (allow_zero && v == 0.0)) => {
                    Duration::from_secs_f64(v)
                }
                _ => {
                    tracing::warn!(key, value = %raw, "Invalid duration, using default");
                    default
                }
            },
            None => default,
        };

        Self {
            base_url,
            api_key,
            max_attempts,
            attempt_ceiling: secs("EXECUTOR_ATTEMPT_CEILING_SECS", defaults.attempt_ceiling, false),
            submit_backoff: secs("EXECUTOR_SUBMIT_BACKOFF_SECS", defaults.submit_backoff, true),
            poll_pause: secs("EXECUTOR_POLL_PAUSE_SECS", defaults.poll_pause, true),
            check_timeout: secs("EXECUTOR_CHECK_TIMEOUT_SECS", defaults.check_timeout, false),
            ping_timeout: secs("EXECUTOR_PING_TIMEOUT_SECS", defaults.ping_timeout, false),
            request_timeout: secs("EXECUTOR_REQUEST_TIMEOUT_SECS", defaults.request_timeout, false),
        }
    }

    /// Extra top-level fields merged into every `/prompt` body.
    pub fn prompt_extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        if let Some(key) = &self.api_key {
            extra.insert(
                "extra_data".to_string(),
                json!({ "api_key_comfy_org": key }),
            );
        }
        extra
    }

    /// An API client for the configured backend.
    pub fn api(&self) -> ComfyUIApi {
        ComfyUIApi::new(self.base_url.clone())
            .with_timeouts(self.request_timeout, self.ping_timeout)
    }
}
