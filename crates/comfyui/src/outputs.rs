//! Output aggregation: turns raw per-node history outputs into
//! caller-addressable artifacts.
//!
//! A node's output record holds arrays of file descriptors
//! (`{"filename", "subfolder", "type"}`) under keys such as `images`,
//! `gifs`, `videos` or `audio`, plus an optional `text` field. Files are
//! bucketed by extension rather than by key, because custom nodes are
//! inconsistent about which key they use.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::result::ExecutionResult;

// ---------------------------------------------------------------------------
// Extension tables
// ---------------------------------------------------------------------------

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

/// Output record field holding text results.
const TEXT_FIELD: &str = "text";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Kind of media artifact, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Classify a filename by its (case-insensitive) extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }
}

/// A file produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// ComfyUI folder type (`output`, `temp`, `input`).
    #[serde(rename = "type", default)]
    pub folder_type: String,
    /// `GET /view` URL the file can be downloaded from.
    pub url: String,
    /// Where the file was stored locally after transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl Artifact {
    /// Build an artifact whose URL points at `{base_url}/view`.
    pub fn new(
        base_url: &str,
        filename: impl Into<String>,
        subfolder: impl Into<String>,
        folder_type: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let subfolder = subfolder.into();
        let folder_type = folder_type.into();
        let url = view_url(base_url, &filename, &subfolder, &folder_type);
        Self {
            filename,
            subfolder,
            folder_type,
            url,
            local_path: None,
        }
    }
}

/// Media artifacts of a single node, bucketed by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedMedia {
    pub images: Vec<Artifact>,
    pub videos: Vec<Artifact>,
    pub audios: Vec<Artifact>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Partition the file descriptors of one node's output record.
///
/// Every array field is scanned for objects with a `filename`; entries
/// whose extension is not a known media type are dropped.
pub fn classify(node_output: &Value, base_url: &str) -> ClassifiedMedia {
    let mut media = ClassifiedMedia::default();
    let Some(fields) = node_output.as_object() else {
        return media;
    };

    for (key, value) in fields {
        if key == TEXT_FIELD {
            continue;
        }
        let Some(items) = value.as_array() else {
            continue;
        };
        for item in items {
            let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                continue;
            };
            let Some(kind) = MediaKind::from_filename(filename) else {
                tracing::debug!(filename, field = %key, "Skipping output with unknown extension");
                continue;
            };
            let artifact = Artifact::new(
                base_url,
                filename,
                str_field(item, "subfolder"),
                str_field(item, "type"),
            );
            match kind {
                MediaKind::Image => media.images.push(artifact),
                MediaKind::Video => media.videos.push(artifact),
                MediaKind::Audio => media.audios.push(artifact),
            }
        }
    }

    media
}

/// Normalize a node's `text` field into a list of strings.
///
/// A string becomes a one-element list, a list keeps its items (non-string
/// items are stringified), any other value is stringified. Returns `None`
/// when the record has no `text` field.
pub fn extract_texts(node_output: &Value) -> Option<Vec<String>> {
    let text = node_output.get(TEXT_FIELD)?;
    let texts = match text {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        other => vec![other.to_string()],
    };
    Some(texts)
}

// ---------------------------------------------------------------------------
// Re-keying
// ---------------------------------------------------------------------------

/// Re-key per-node artifacts by output variable name.
///
/// Nodes absent from `var_map` keep their node ID as key. Key order is
/// the order in which nodes appear in `by_node`; when several nodes map
/// to one variable their artifacts are appended in that same order.
pub fn map_outputs_by_var<T: Clone>(
    var_map: &IndexMap<String, String>,
    by_node: &IndexMap<String, Vec<T>>,
) -> IndexMap<String, Vec<T>> {
    let mut by_var: IndexMap<String, Vec<T>> = IndexMap::new();
    for (node_id, items) in by_node {
        let key = var_map.get(node_id).unwrap_or(node_id);
        by_var
            .entry(key.clone())
            .or_default()
            .extend(items.iter().cloned());
    }
    by_var
}

/// Concatenate every variable's items in map order.
pub fn flatten<T: Clone>(by_var: &IndexMap<String, Vec<T>>) -> Vec<T> {
    by_var.values().flat_map(|items| items.iter().cloned()).collect()
}

/// Classify all node outputs and fill the artifact fields of `result`.
///
/// `outputs` is iterated in backend order; that order drives the key
/// order of every `*_by_var` map.
pub fn aggregate_into(
    result: &mut ExecutionResult,
    outputs: &Map<String, Value>,
    base_url: &str,
    var_map: &IndexMap<String, String>,
) {
    let mut images = IndexMap::new();
    let mut videos = IndexMap::new();
    let mut audios = IndexMap::new();
    let mut texts = IndexMap::new();

    for (node_id, node_output) in outputs {
        let media = classify(node_output, base_url);
        if !media.images.is_empty() {
            images.insert(node_id.clone(), media.images);
        }
        if !media.videos.is_empty() {
            videos.insert(node_id.clone(), media.videos);
        }
        if !media.audios.is_empty() {
            audios.insert(node_id.clone(), media.audios);
        }
        if let Some(node_texts) = extract_texts(node_output) {
            texts.insert(node_id.clone(), node_texts);
        }
    }

    result.images_by_var = map_outputs_by_var(var_map, &images);
    result.images = flatten(&result.images_by_var);
    result.videos_by_var = map_outputs_by_var(var_map, &videos);
    result.videos = flatten(&result.videos_by_var);
    result.audios_by_var = map_outputs_by_var(var_map, &audios);
    result.audios = flatten(&result.audios_by_var);
    result.texts_by_var = map_outputs_by_var(var_map, &texts);
    result.texts = flatten(&result.texts_by_var);
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `{base_url}/view?filename=..&subfolder=..&type=..` with encoded values.
fn view_url(base_url: &str, filename: &str, subfolder: &str, folder_type: &str) -> String {
    let base = format!("{}/view", base_url.trim_end_matches('/'));
    let params = [
        ("filename", filename),
        ("subfolder", subfolder),
        ("type", folder_type),
    ];
    match reqwest::Url::parse_with_params(&base, &params) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}?filename={filename}&subfolder={subfolder}&type={folder_type}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "http://comfy:8188";

    fn var_map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn media_kind_by_extension() {
        assert_eq!(MediaKind::from_filename("a.PNG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_filename("a.gif"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_filename("clip.mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_filename("voice.flac"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_filename("latent.safetensors"), None);
        assert_eq!(MediaKind::from_filename("noext"), None);
    }

    #[test]
    fn classify_buckets_by_extension_not_key() {
        let output = json!({
            "images": [{"filename": "a.png", "subfolder": "", "type": "output"}],
            "gifs": [{"filename": "b.mp4", "subfolder": "vid", "type": "output"}],
            "audio": [{"filename": "c.wav", "subfolder": "", "type": "output"}],
            "latents": [{"filename": "d.latent", "subfolder": "", "type": "output"}],
            "animated": [false]
        });

        let media = classify(&output, BASE);

        assert_eq!(media.images.len(), 1);
        assert_eq!(media.images[0].filename, "a.png");
        assert_eq!(media.videos.len(), 1);
        assert_eq!(media.videos[0].subfolder, "vid");
        assert_eq!(media.audios.len(), 1);
    }

    #[test]
    fn artifact_url_is_encoded() {
        let a = Artifact::new("http://comfy:8188/", "my image.png", "sub/dir", "output");
        assert_eq!(
            a.url,
            "http://comfy:8188/view?filename=my+image.png&subfolder=sub%2Fdir&type=output"
        );
    }

    #[test]
    fn texts_are_normalized() {
        assert_eq!(extract_texts(&json!({"text": "hello"})), Some(vec!["hello".to_string()]));
        assert_eq!(
            extract_texts(&json!({"text": ["a", 2, true]})),
            Some(vec!["a".to_string(), "2".to_string(), "true".to_string()])
        );
        assert_eq!(extract_texts(&json!({"text": 42})), Some(vec!["42".to_string()]));
        assert_eq!(extract_texts(&json!({"images": []})), None);
    }

    #[test]
    fn unmapped_node_keeps_node_id() {
        let mut by_node = IndexMap::new();
        by_node.insert("7".to_string(), vec!["x"]);
        by_node.insert("12".to_string(), vec!["y"]);

        let by_var = map_outputs_by_var(&var_map(&[("7", "result_image")]), &by_node);

        let keys: Vec<&str> = by_var.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["result_image", "12"]);
        assert_eq!(by_var["12"], vec!["y"]);
    }

    #[test]
    fn nodes_sharing_a_variable_are_appended() {
        let mut by_node = IndexMap::new();
        by_node.insert("1".to_string(), vec![1, 2]);
        by_node.insert("2".to_string(), vec![3]);

        let by_var = map_outputs_by_var(&var_map(&[("1", "v"), ("2", "v")]), &by_node);

        assert_eq!(by_var.len(), 1);
        assert_eq!(by_var["v"], vec![1, 2, 3]);
    }

    #[test]
    fn flatten_keeps_variable_then_item_order() {
        let mut by_var = IndexMap::new();
        by_var.insert("second".to_string(), vec!["c", "d"]);
        by_var.insert("first".to_string(), vec!["a", "b"]);

        assert_eq!(flatten(&by_var), vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn aggregate_single_image_node() {
        let outputs = json!({
            "7": {"images": [{"filename": "out.png", "subfolder": "", "type": "output"}]}
        });
        let mut result = ExecutionResult::processing("p");

        aggregate_into(
            &mut result,
            outputs.as_object().unwrap(),
            BASE,
            &var_map(&[("7", "result_image")]),
        );

        let expected = Artifact::new(BASE, "out.png", "", "output");
        assert_eq!(result.images_by_var.len(), 1);
        assert_eq!(result.images_by_var["result_image"], vec![expected.clone()]);
        assert_eq!(result.images, vec![expected]);
        assert!(result.videos.is_empty());
        assert!(result.texts_by_var.is_empty());
    }

    #[test]
    fn aggregate_is_deterministic_across_runs() {
        let outputs = json!({
            "20": {"images": [{"filename": "b.png"}, {"filename": "c.png"}], "text": "caption"},
            "4": {"images": [{"filename": "a.png"}]},
            "9": {"videos": [{"filename": "v.webm"}]}
        });
        let map = var_map(&[("4", "thumb")]);

        let mut first = ExecutionResult::processing("p");
        aggregate_into(&mut first, outputs.as_object().unwrap(), BASE, &map);
        let mut second = ExecutionResult::processing("p");
        aggregate_into(&mut second, outputs.as_object().unwrap(), BASE, &map);

        assert_eq!(first, second);
        let keys: Vec<&str> = first.images_by_var.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["20", "thumb"]);
        let names: Vec<&str> = first.images.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["b.png", "c.png", "a.png"]);
        assert_eq!(first.texts, vec!["caption".to_string()]);
        assert_eq!(first.videos_by_var["9"].len(), 1);
    }
}
