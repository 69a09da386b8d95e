//! ComfyUI API-format workflow templates.
//!
//! A template is the JSON object ComfyUI accepts as the `prompt` field
//! of `POST /prompt`: each key is a node ID and each value holds the
//! node's `class_type`, `inputs`, and optional `_meta` block.
//!
//! ```json
//! {
//!   "3": { "class_type": "KSampler", "inputs": { "seed": 42 } },
//!   "9": { "class_type": "SaveImage", "_meta": { "title": "$output.result_image" } }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// An immutable node graph loaded from a workflow file.
///
/// Node order follows the source file. Every mutation helper returns a
/// new template instead of editing in place, so one loaded template can
/// be re-parameterized once per submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobTemplate {
    nodes: Map<String, Value>,
}

impl JobTemplate {
    /// Build a template from an already-parsed JSON value.
    ///
    /// The root must be a non-empty object whose values are objects.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(nodes) = value else {
            return Err(CoreError::Validation(
                "Workflow JSON must be an object".to_string(),
            ));
        };

        if nodes.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }

        if let Some((node_id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(CoreError::Validation(format!(
                "Node '{node_id}' must be a JSON object"
            )));
        }

        Ok(Self { nodes })
    }

    /// All nodes keyed by node ID, in file order.
    pub fn nodes(&self) -> &Map<String, Value> {
        &self.nodes
    }

    /// Look up a single node by ID.
    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    /// The `_meta.title` of a node, if it has one.
    pub fn node_title(&self, node_id: &str) -> Option<&str> {
        self.nodes
            .get(node_id)?
            .get("_meta")?
            .get("title")?
            .as_str()
    }

    /// Mutable access to a node's `inputs` object, creating it if absent.
    pub(crate) fn inputs_mut(&mut self, node_id: &str) -> Option<&mut Map<String, Value>> {
        let node = self.nodes.get_mut(node_id)?.as_object_mut()?;
        let inputs = node
            .entry("inputs")
            .or_insert_with(|| Value::Object(Map::new()));
        inputs.as_object_mut()
    }

    /// Iterate mutably over every node's `inputs` object.
    pub(crate) fn all_inputs_mut(&mut self) -> impl Iterator<Item = &mut Map<String, Value>> {
        self.nodes.values_mut().filter_map(|node| {
            node.as_object_mut()?
                .get_mut("inputs")?
                .as_object_mut()
        })
    }

    /// The graph as the JSON value sent to the backend.
    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }
}

/// Read and parse a workflow template from disk.
///
/// A missing file is [`CoreError::NotFound`]; a file that is not a
/// valid workflow object is [`CoreError::Validation`].
pub fn load_template(path: &Path) -> Result<JobTemplate, CoreError> {
    if !path.exists() {
        return Err(CoreError::NotFound(format!(
            "Workflow file missing: {}",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| {
        CoreError::Validation(format!(
            "Workflow file {} is not valid JSON: {e}",
            path.display()
        ))
    })?;

    let template = JobTemplate::from_value(value)?;
    tracing::debug!(
        path = %path.display(),
        node_count = template.nodes().len(),
        "Loaded workflow template",
    );
    Ok(template)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn from_value_rejects_non_object_root() {
        let err = JobTemplate::from_value(json!([1, 2, 3])).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn from_value_rejects_empty_graph() {
        let err = JobTemplate::from_value(json!({})).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn from_value_rejects_scalar_node() {
        let err = JobTemplate::from_value(json!({"1": 5})).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("'1'"));
    }

    #[test]
    fn node_order_follows_source() {
        let template = JobTemplate::from_value(json!({
            "10": {"class_type": "A"},
            "2": {"class_type": "B"},
            "7": {"class_type": "C"},
        }))
        .unwrap();
        let ids: Vec<&str> = template.nodes().keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["10", "2", "7"]);
    }

    #[test]
    fn node_title_reads_meta() {
        let template = JobTemplate::from_value(json!({
            "9": {"class_type": "SaveImage", "_meta": {"title": "$output.result"}},
            "3": {"class_type": "KSampler"},
        }))
        .unwrap();
        assert_eq!(template.node_title("9"), Some("$output.result"));
        assert_eq!(template.node_title("3"), None);
        assert_eq!(template.node_title("404"), None);
    }

    #[test]
    fn load_template_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_template(&dir.path().join("nope.json")).unwrap_err();
        assert_matches!(err, CoreError::NotFound(_));
    }

    #[test]
    fn load_template_invalid_json_is_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_template(&path).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn load_template_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(&path, r#"{"1": {"class_type": "LoadImage", "inputs": {}}}"#).unwrap();
        let template = load_template(&path).unwrap();
        assert!(template.node("1").is_some());
    }
}
