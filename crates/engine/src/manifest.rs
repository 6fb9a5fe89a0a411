//! Manifest rendering and validation.
//!
//! Every manifest must carry a positive integer generation under the
//! [`GENERATION_ANNOTATION`] annotation; comparing that value with the one on
//! the existing resource decides whether to create, update, or skip.

use adapter_types::GENERATION_ANNOTATION;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    template::{self, TemplateError},
    transport::{GroupVersionKind, ResourceKey},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("manifest is missing '{0}'")]
    MissingField(&'static str),

    #[error("manifest must be a map")]
    NotAMap,

    #[error("manifest is missing the 'adapter.io/generation' annotation")]
    MissingGeneration,

    #[error("invalid 'adapter.io/generation' annotation '{value}': expected a positive integer")]
    InvalidGeneration { value: String },
}

/// Identity of a rendered, validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub key: ResourceKey,
    pub generation: i64,
}

impl ManifestInfo {
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.key.gvk
    }
}

/// Renders all string leaves and keys of a manifest template into a fresh document.
pub fn render_manifest(template: &Value, vars: &Map<String, Value>) -> Result<Value, ManifestError> {
    Ok(template::render_value(template, vars)?)
}

/// Checks apiVersion, kind, metadata.name, and the generation annotation.
pub fn validate_manifest(manifest: &Value) -> Result<ManifestInfo, ManifestError> {
    if !manifest.is_object() {
        return Err(ManifestError::NotAMap);
    }
    let non_empty = |value: Option<&Value>| value.and_then(Value::as_str).filter(|text| !text.trim().is_empty()).is_some();
    if !non_empty(manifest.get("apiVersion")) {
        return Err(ManifestError::MissingField("apiVersion"));
    }
    if !non_empty(manifest.get("kind")) {
        return Err(ManifestError::MissingField("kind"));
    }
    if !non_empty(manifest.pointer("/metadata/name")) {
        return Err(ManifestError::MissingField("metadata.name"));
    }
    let generation = generation_of(manifest)?.ok_or(ManifestError::MissingGeneration)?;
    let key = ResourceKey::of(manifest).ok_or(ManifestError::MissingField("metadata.name"))?;
    Ok(ManifestInfo { key, generation })
}

/// Reads the generation annotation; `Ok(None)` when absent.
pub fn generation_of(document: &Value) -> Result<Option<i64>, ManifestError> {
    let Some(raw) = document
        .get("metadata")
        .and_then(|metadata| metadata.get("annotations"))
        .and_then(|annotations| annotations.get(GENERATION_ANNOTATION))
    else {
        return Ok(None);
    };
    let parsed = match raw {
        Value::String(text) => text.trim().parse::<i64>().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    };
    match parsed {
        Some(generation) if generation > 0 => Ok(Some(generation)),
        _ => Err(ManifestError::InvalidGeneration {
            value: crate::template::display_value(raw),
        }),
    }
}

/// Generation of an existing document, treating a missing or malformed annotation as 0.
pub fn existing_generation(document: &Value) -> i64 {
    generation_of(document).ok().flatten().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namespace(generation: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "ns-{{ .clusterId }}", "annotations": {GENERATION_ANNOTATION: generation}}
        })
    }

    fn vars() -> Map<String, Value> {
        let Value::Object(map) = json!({"clusterId": "c1", "generation": 2}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn renders_and_validates() {
        let rendered = render_manifest(&namespace(json!("{{ .generation }}")), &vars()).unwrap();
        let info = validate_manifest(&rendered).unwrap();
        assert_eq!(info.key.name, "ns-c1");
        assert_eq!(info.key.namespace, None);
        assert_eq!(info.gvk().kind, "Namespace");
        assert_eq!(info.generation, 2);
    }

    #[test]
    fn rendering_twice_with_different_params_leaves_the_template_untouched() {
        let template = namespace(json!("{{ .generation }}"));
        let pristine = template.clone();

        let first = render_manifest(&template, &vars()).unwrap();
        let Value::Object(other) = json!({"clusterId": "c2", "generation": 5}) else {
            unreachable!()
        };
        let second = render_manifest(&template, &other).unwrap();

        assert_eq!(first["metadata"]["name"], "ns-c1");
        assert_eq!(validate_manifest(&first).unwrap().generation, 2);
        assert_eq!(second["metadata"]["name"], "ns-c2");
        assert_eq!(validate_manifest(&second).unwrap().generation, 5);
        assert_eq!(template, pristine);
    }

    #[test]
    fn rejects_missing_identity_fields() {
        assert_eq!(validate_manifest(&json!([])).unwrap_err(), ManifestError::NotAMap);
        assert_eq!(
            validate_manifest(&json!({"kind": "Namespace", "metadata": {"name": "x"}})).unwrap_err(),
            ManifestError::MissingField("apiVersion")
        );
        assert_eq!(
            validate_manifest(&json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "x"}})).unwrap_err(),
            ManifestError::MissingGeneration
        );
    }

    #[test]
    fn generation_must_be_a_positive_integer() {
        assert!(matches!(validate_manifest(&namespace(json!("zero"))), Err(ManifestError::InvalidGeneration { .. })));
        assert!(matches!(validate_manifest(&namespace(json!(0))), Err(ManifestError::InvalidGeneration { .. })));
        assert_eq!(validate_manifest(&namespace(json!(3))).unwrap().generation, 3);
    }

    #[test]
    fn existing_generation_defaults_to_zero() {
        assert_eq!(existing_generation(&json!({"metadata": {}})), 0);
        assert_eq!(existing_generation(&namespace(json!("bad"))), 0);
        assert_eq!(existing_generation(&namespace(json!("4"))), 4);
    }
}
