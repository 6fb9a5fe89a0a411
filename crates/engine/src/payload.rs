//! Post-action payload building.
//!
//! A payload definition is walked recursively. Maps whose keys are a subset of
//! `field`, `expression`, and `default` (with at least one of the first two)
//! are value extractions; every other string leaf is rendered as a template.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::{
    criteria::{CriteriaError, Evaluator},
    template::{self, TemplateError},
};

const EXTRACTION_KEYS: [&str; 3] = ["field", "expression", "default"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("failed to render '{path}': {source}")]
    Template {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("failed to extract '{path}': {source}")]
    Extraction {
        path: String,
        #[source]
        source: CriteriaError,
    },

    #[error("extraction at '{path}' must be a string")]
    InvalidExtraction { path: String },
}

/// Builds one payload document against `vars`.
pub fn build_payload(definition: &Value, vars: &Map<String, Value>) -> Result<Value, PayloadError> {
    build_at(definition, &Evaluator::new(vars), "")
}

/// Builds a payload and serializes it to the JSON string stored in params.
pub fn build_payload_string(definition: &Value, vars: &Map<String, Value>) -> Result<String, PayloadError> {
    let built = build_payload(definition, vars)?;
    Ok(built.to_string())
}

fn build_at(value: &Value, evaluator: &Evaluator<'_>, path: &str) -> Result<Value, PayloadError> {
    match value {
        Value::String(text) => template::render(text, evaluator.vars())
            .map(Value::String)
            .map_err(|source| PayloadError::Template {
                path: display_path(path),
                source,
            }),
        Value::Object(map) if is_extraction(map) => extract(map, evaluator, path),
        Value::Object(map) => {
            let mut built = Map::with_capacity(map.len());
            for (key, child) in map {
                built.insert(key.clone(), build_at(child, evaluator, &join(path, key))?);
            }
            Ok(Value::Object(built))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| build_at(item, evaluator, &format!("{path}[{index}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        literal => Ok(literal.clone()),
    }
}

fn is_extraction(map: &Map<String, Value>) -> bool {
    !map.is_empty()
        && map.keys().all(|key| EXTRACTION_KEYS.contains(&key.as_str()))
        && (map.contains_key("field") || map.contains_key("expression"))
}

/// Resolves a `field` or `expression` leaf; a missing or null result takes `default`.
///
/// A failing expression also takes `default` when one is given.
fn extract(map: &Map<String, Value>, evaluator: &Evaluator<'_>, path: &str) -> Result<Value, PayloadError> {
    let default = map.get("default");
    let source = match map.get("field").or_else(|| map.get("expression")) {
        Some(Value::String(source)) => source,
        _ => return Err(PayloadError::InvalidExtraction { path: display_path(path) }),
    };

    let extracted = if map.contains_key("field") {
        Ok(evaluator.lookup(source).cloned())
    } else {
        evaluator.extract(source)
    };
    match extracted {
        Ok(Some(value)) if !value.is_null() => Ok(value),
        Ok(_) => Ok(default.cloned().unwrap_or(Value::Null)),
        Err(error) => match default {
            Some(default) => {
                warn!(path = %display_path(path), error = %error, "payload extraction failed; using default");
                Ok(default.clone())
            }
            None => Err(PayloadError::Extraction {
                path: display_path(path),
                source: error,
            }),
        },
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() { "<root>".to_string() } else { path.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let Value::Object(vars) = json!({
            "clusterId": "c1",
            "adapter": {"executionStatus": "success", "resourcesSkipped": false},
            "resources": {"namespace": {"metadata": {"name": "ns-c1"}}}
        }) else {
            unreachable!()
        };
        vars
    }

    #[test]
    fn builds_nested_payloads() {
        let definition = json!({
            "clusterId": "{{ .clusterId }}",
            "conditions": [{
                "type": "Applied",
                "status": {"expression": "adapter.executionStatus == 'success' ? 'True' : 'False'"},
                "namespace": {"field": "resources.namespace.metadata.name"}
            }],
            "attempt": 1,
            "ready": true
        });
        let built = build_payload(&definition, &vars()).unwrap();
        assert_eq!(built["clusterId"], "c1");
        assert_eq!(built["conditions"][0]["status"], "True");
        assert_eq!(built["conditions"][0]["namespace"], "ns-c1");
        assert_eq!(built["attempt"], 1);
        assert_eq!(built["ready"], true);
    }

    #[test]
    fn missing_values_take_the_default() {
        let definition = json!({
            "deployment": {"field": "resources.deployment.metadata.name", "default": "none"},
            "reason": {"field": "adapter.skipReason"},
            "count": {"expression": "resources.deployment.status.replicas", "default": 0}
        });
        let built = build_payload(&definition, &vars()).unwrap();
        assert_eq!(built["deployment"], "none");
        assert_eq!(built["reason"], Value::Null);
        assert_eq!(built["count"], 0);
    }

    #[test]
    fn failing_expression_without_default_is_an_error() {
        let definition = json!({"count": {"expression": "size(resources.deployment.spec)"}});
        let error = build_payload(&definition, &vars()).unwrap_err();
        assert!(matches!(error, PayloadError::Extraction { ref path, .. } if path == "count"));
    }

    #[test]
    fn maps_with_other_keys_are_plain_objects() {
        let definition = json!({"meta": {"field": "literal", "kind": "x"}});
        let built = build_payload(&definition, &vars()).unwrap();
        assert_eq!(built["meta"], json!({"field": "literal", "kind": "x"}));
    }

    #[test]
    fn template_errors_carry_the_path() {
        let definition = json!({"outer": {"inner": ["{{ .nope }}"]}});
        let error = build_payload(&definition, &vars()).unwrap_err();
        assert!(matches!(error, PayloadError::Template { ref path, .. } if path == "outer.inner[0]"));
    }

    #[test]
    fn serializes_to_a_json_string() {
        let text = build_payload_string(&json!({"id": "{{ .clusterId }}"}), &vars()).unwrap();
        assert_eq!(text, r#"{"id":"c1"}"#);
    }
}
