//! Typed views of the ComfyUI `/history` and `/queue` payloads.
//!
//! History entries look like
//! `{"status": {"status_str": "error", "messages": [["execution_error", {...}]]}, "outputs": {...}}`
//! and queue snapshots like
//! `{"queue_running": [[number, prompt_id, ...]], "queue_pending": [...]}`.
//! Parsing is lenient: unknown fields are ignored and malformed
//! message tuples are skipped rather than failing the whole entry.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Message type ComfyUI records when a node raises.
pub const EXECUTION_ERROR_MESSAGE: &str = "execution_error";

/// `status_str` value of a failed prompt.
pub const STATUS_ERROR: &str = "error";

/// Fallback message when a failed prompt carries no exception details.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// One prompt's record in `/history/{prompt_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Node ID to that node's output record, in backend order.
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// `[message_type, body]` pairs in the order they were emitted.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Value>,
}

/// Body of an `execution_error` history message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionErrorDetails {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
    #[serde(default)]
    pub exception_message: Option<String>,
}

impl HistoryStatus {
    /// Iterate over well-formed `(type, body)` message pairs.
    pub fn message_pairs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.messages.iter().filter_map(|msg| {
            let pair = msg.as_array()?;
            match pair.as_slice() {
                [kind, body, ..] => Some((kind.as_str()?, body)),
                _ => None,
            }
        })
    }

    /// Details of every `execution_error` message, in emission order.
    pub fn execution_errors(&self) -> Vec<ExecutionErrorDetails> {
        self.message_pairs()
            .filter(|(kind, _)| *kind == EXECUTION_ERROR_MESSAGE)
            .filter_map(|(_, body)| serde_json::from_value(body.clone()).ok())
            .collect()
    }
}

impl HistoryEntry {
    /// Whether the backend marked this prompt as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            .is_some_and(|s| s == STATUS_ERROR)
    }

    /// All reported exception messages joined by newlines, or
    /// [`UNKNOWN_ERROR`] when none are attached.
    pub fn error_message(&self) -> String {
        let messages: Vec<String> = self
            .status
            .iter()
            .flat_map(HistoryStatus::execution_errors)
            .filter_map(|details| details.exception_message)
            .collect();

        if messages.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            messages.join("\n")
        }
    }
}

/// Snapshot of `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub queue_running: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub queue_pending: Vec<Value>,
}

impl QueueSnapshot {
    /// Whether `prompt_id` is running or pending.
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.queue_running
            .iter()
            .chain(self.queue_pending.iter())
            .any(|item| queue_item_prompt_id(item) == Some(prompt_id))
    }

    pub fn running_count(&self) -> usize {
        self.queue_running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queue_pending.len()
    }
}

/// ComfyUI sends `null` for lists it has nothing to report in.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Queue items are `[number, prompt_id, prompt, extra_data, outputs]`.
fn queue_item_prompt_id(item: &Value) -> Option<&str> {
    item.as_array()?.get(1)?.as_str()
}
