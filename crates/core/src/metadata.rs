//! Parameter and output metadata declared through node titles.
//!
//! Workflow authors mark nodes by setting `_meta.title`:
//!
//! | Title                          | Meaning                                              |
//! |--------------------------------|------------------------------------------------------|
//! | `$prompt.text`                 | optional parameter `prompt` bound to input `text`    |
//! | `$image.image!`                | required parameter `image` bound to input `image`    |
//! | `$steps.steps:Sampling steps`  | optional parameter with a description                |
//! | `$output.result_image`         | output node whose artifacts are keyed `result_image` |
//!
//! Nodes without a `$`-title are ordinary graph nodes.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::template::JobTemplate;

/// Parameter name reserved for output declarations.
pub const OUTPUT_MARKER: &str = "output";

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)(!)?(?::(.*))?$")
        .expect("valid regex")
});

/// A caller-settable parameter discovered in a template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    /// Node that receives the value.
    pub node_id: String,
    /// Input field within that node.
    pub field: String,
    /// Whether the caller must supply a value.
    pub required: bool,
    /// Value present in the template, used when the caller omits the parameter.
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// Everything the executor needs to know about a template's interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowMetadata {
    /// Parameters by name, in node order.
    pub params: IndexMap<String, ParamSpec>,
    /// Output node ID to caller-facing variable name, in node order.
    pub outputs: IndexMap<String, String>,
}

/// Parse the `$`-titles of a template into [`WorkflowMetadata`].
///
/// Fails when the template declares neither parameters nor outputs, or
/// when two nodes declare the same parameter name.
pub fn load_metadata(template: &JobTemplate) -> Result<WorkflowMetadata, CoreError> {
    let mut metadata = WorkflowMetadata::default();

    for node_id in template.nodes().keys() {
        let Some(title) = template.node_title(node_id) else {
            continue;
        };
        let Some(caps) = TITLE_RE.captures(title.trim()) else {
            if title.starts_with('$') {
                tracing::warn!(node_id = %node_id, title, "Ignoring malformed metadata title");
            }
            continue;
        };

        let name = &caps[1];
        let field = &caps[2];

        if name == OUTPUT_MARKER {
            metadata
                .outputs
                .insert(node_id.clone(), field.to_string());
            continue;
        }

        if metadata.params.contains_key(name) {
            return Err(CoreError::Validation(format!(
                "Parameter '{name}' is declared more than once (again on node '{node_id}')"
            )));
        }

        let default = template
            .node(node_id)
            .and_then(|node| node.get("inputs"))
            .and_then(|inputs| inputs.get(field))
            .filter(|value| !is_link(value))
            .cloned();

        metadata.params.insert(
            name.to_string(),
            ParamSpec {
                node_id: node_id.clone(),
                field: field.to_string(),
                required: caps.get(3).is_some(),
                default,
                description: caps
                    .get(4)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
        );
    }

    if metadata.params.is_empty() && metadata.outputs.is_empty() {
        return Err(CoreError::Validation(
            "Invalid metadata: workflow declares no parameters or outputs".to_string(),
        ));
    }

    Ok(metadata)
}

/// Output node ID to variable name mapping used to key result artifacts.
pub fn extract_output_var_map(metadata: &WorkflowMetadata) -> IndexMap<String, String> {
    metadata.outputs.clone()
}

/// ComfyUI encodes node connections as `[source_node_id, output_index]`.
fn is_link(value: &Value) -> bool {
    matches!(value.as_array(), Some(arr) if arr.len() == 2 && arr[1].is_u64())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn template(value: Value) -> JobTemplate {
        JobTemplate::from_value(value).unwrap()
    }

    #[test]
    fn parses_params_and_outputs() {
        let t = template(json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "a cat", "clip": ["4", 1]},
                "_meta": {"title": "$prompt.text:Positive prompt"}
            },
            "10": {
                "class_type": "LoadImage",
                "inputs": {"image": "in.png"},
                "_meta": {"title": "$image.image!"}
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": {"images": ["8", 0]},
                "_meta": {"title": "$output.result_image"}
            }
        }));

        let meta = load_metadata(&t).unwrap();

        let prompt = &meta.params["prompt"];
        assert_eq!(prompt.node_id, "6");
        assert_eq!(prompt.field, "text");
        assert!(!prompt.required);
        assert_eq!(prompt.default, Some(json!("a cat")));
        assert_eq!(prompt.description.as_deref(), Some("Positive prompt"));

        let image = &meta.params["image"];
        assert!(image.required);
        assert_eq!(image.description, None);

        assert_eq!(meta.outputs.get("9").map(String::as_str), Some("result_image"));
    }

    #[test]
    fn linked_input_has_no_default() {
        let t = template(json!({
            "5": {
                "class_type": "VAEDecode",
                "inputs": {"samples": ["3", 0]},
                "_meta": {"title": "$latent.samples"}
            }
        }));
        let meta = load_metadata(&t).unwrap();
        assert_eq!(meta.params["latent"].default, None);
    }

    #[test]
    fn no_metadata_is_invalid() {
        let t = template(json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}, "_meta": {"title": "KSampler"}}
        }));
        assert_matches!(load_metadata(&t), Err(CoreError::Validation(_)));
    }

    #[test]
    fn duplicate_param_is_invalid() {
        let t = template(json!({
            "1": {"class_type": "A", "inputs": {"x": 1}, "_meta": {"title": "$p.x"}},
            "2": {"class_type": "B", "inputs": {"y": 1}, "_meta": {"title": "$p.y"}}
        }));
        assert_matches!(load_metadata(&t), Err(CoreError::Validation(msg)) if msg.contains("'p'"));
    }

    #[test]
    fn malformed_titles_are_skipped() {
        let t = template(json!({
            "1": {"class_type": "A", "_meta": {"title": "$broken"}},
            "2": {"class_type": "SaveImage", "_meta": {"title": "$output.img"}}
        }));
        let meta = load_metadata(&t).unwrap();
        assert!(meta.params.is_empty());
        assert_eq!(meta.outputs.len(), 1);
    }

    #[test]
    fn output_var_map_keeps_node_order() {
        let t = template(json!({
            "20": {"class_type": "SaveVideo", "_meta": {"title": "$output.clip"}},
            "3": {"class_type": "SaveImage", "_meta": {"title": "$output.still"}}
        }));
        let meta = load_metadata(&t).unwrap();
        let map = extract_output_var_map(&meta);
        let pairs: Vec<(&str, &str)> = map
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, vec![("20", "clip"), ("3", "still")]);
    }
}
