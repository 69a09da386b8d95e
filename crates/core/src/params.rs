//! Substitution of caller parameters into a template.

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::metadata::WorkflowMetadata;
use crate::template::JobTemplate;

/// Write caller parameters into a copy of `template`.
///
/// Each declared parameter takes the supplied value, or its template
/// default when omitted. A missing required parameter is a validation
/// error. Supplied names the template does not declare are ignored.
pub fn apply_params(
    template: &JobTemplate,
    metadata: &WorkflowMetadata,
    params: &Map<String, Value>,
) -> Result<JobTemplate, CoreError> {
    for name in params.keys() {
        if !metadata.params.contains_key(name) {
            tracing::warn!(param = %name, "Ignoring unknown workflow parameter");
        }
    }

    let mut applied = template.clone();

    for (name, spec) in &metadata.params {
        let value = match params.get(name) {
            Some(value) => value.clone(),
            None if spec.required => {
                return Err(CoreError::Validation(format!(
                    "Required parameter '{name}' is missing"
                )));
            }
            None => match &spec.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };

        let inputs = applied.inputs_mut(&spec.node_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Parameter '{name}' targets node '{}' which is not an object",
                spec.node_id
            ))
        })?;
        inputs.insert(spec.field.clone(), value);
    }

    Ok(applied)
}
