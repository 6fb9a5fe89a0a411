//! Configuration validation.
//!
//! Validation is an explicit check list run once after parsing. The engine relies on
//! these guarantees (unique names, known parameter sources, mutually exclusive
//! condition forms) and does not re-check them at execution time.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::{AdapterConfig, ApiCallSpec, DiscoverySpec, LogAction, ParameterSpec, PreconditionSpec, ResourceSpec, TransportKind};
use crate::duration::parse_duration;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should compile"));

const PARAMETER_SOURCE_PREFIXES: &[&str] = &["event.", "env.", "secret.", "configmap."];

/// Names the engine injects into the evaluation variables alongside params. Parameters,
/// preconditions, captures, and payloads all land in params, so none may use them.
const RESERVED_PARAMETER_NAMES: &[&str] = &["adapter", "resources"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{path}: missing required field '{field}'")]
    MissingRequiredField { path: String, field: String },

    #[error("{path}: '{name}' is not a valid identifier (letters, digits, and underscores; must not start with a digit)")]
    InvalidIdentifier { path: String, name: String },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: String, name: String },

    #[error("{path}: '{first}' and '{second}' are mutually exclusive")]
    MutuallyExclusive { path: String, first: String, second: String },

    #[error("{path}: {reason}")]
    InvalidField { path: String, reason: String },
}

impl ValidationError {
    fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.into(),
            reason: reason.into(),
        }
    }

    fn missing(path: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            path: path.into(),
            field: field.into(),
        }
    }
}

/// Validates an entire adapter configuration, returning the first violation found.
pub fn validate_adapter_config(config: &AdapterConfig) -> Result<(), ValidationError> {
    let spec = &config.spec;
    let mut param_names = HashSet::new();

    for (index, param) in spec.params.iter().enumerate() {
        let path = format!("spec.params[{index}]");
        validate_parameter(param, &path)?;
        ensure_unique(&mut param_names, "parameter", &param.name)?;
    }

    let mut precondition_names = HashSet::new();
    for (index, precondition) in spec.preconditions.iter().enumerate() {
        let path = format!("spec.preconditions[{index}]");
        validate_precondition(precondition, &path)?;
        ensure_unique(&mut precondition_names, "precondition", &precondition.name)?;
    }

    let mut resource_names = HashSet::new();
    for (index, resource) in spec.resources.iter().enumerate() {
        let path = format!("spec.resources[{index}]");
        validate_resource(resource, &path)?;
        ensure_unique(&mut resource_names, "resource", &resource.name)?;
        for nested in &resource.nested_discoveries {
            ensure_unique(&mut resource_names, "resource", &nested.name)?;
        }
    }

    if let Some(post) = &spec.post {
        let mut payload_names = HashSet::new();
        for (index, payload) in post.payloads.iter().enumerate() {
            let path = format!("spec.post.payloads[{index}]");
            validate_identifier(&payload.name, &path)?;
            ensure_not_reserved(&payload.name, &path)?;
            if !payload.build.is_object() {
                return Err(ValidationError::invalid(format!("{path}.build"), "payload build must be a map"));
            }
            ensure_unique(&mut payload_names, "payload", &payload.name)?;
        }

        let mut action_names = HashSet::new();
        for (index, action) in post.post_actions.iter().enumerate() {
            let path = format!("spec.post.postActions[{index}]");
            if action.name.trim().is_empty() {
                return Err(ValidationError::missing(path, "name"));
            }
            if let Some(log) = &action.log {
                validate_log_action(log, &format!("{path}.log"))?;
            }
            if let Some(api_call) = &action.api_call {
                validate_api_call(api_call, &format!("{path}.apiCall"))?;
            }
            ensure_unique(&mut action_names, "post-action", &action.name)?;
        }
    }

    debug!(adapter = %config.metadata.name, "adapter config validated");
    Ok(())
}

fn ensure_unique(seen: &mut HashSet<String>, kind: &str, name: &str) -> Result<(), ValidationError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(ValidationError::DuplicateName {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }
}

fn validate_identifier(name: &str, path: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::missing(path, "name"));
    }
    if !IDENTIFIER_REGEX.is_match(name) {
        return Err(ValidationError::InvalidIdentifier {
            path: path.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn ensure_not_reserved(name: &str, path: &str) -> Result<(), ValidationError> {
    if RESERVED_PARAMETER_NAMES.contains(&name) {
        return Err(ValidationError::invalid(format!("{path}.name"), format!("'{name}' is reserved")));
    }
    Ok(())
}

fn validate_parameter(param: &ParameterSpec, path: &str) -> Result<(), ValidationError> {
    validate_identifier(&param.name, path)?;
    ensure_not_reserved(&param.name, path)?;
    let source = param.source.trim();
    if source.is_empty() {
        return Err(ValidationError::missing(path, "source"));
    }
    let Some(prefix) = PARAMETER_SOURCE_PREFIXES.iter().find(|prefix| source.starts_with(**prefix)) else {
        return Err(ValidationError::invalid(
            format!("{path}.source"),
            format!("unsupported source '{source}'; expected one of event.*, env.*, secret.*, configmap.*"),
        ));
    };
    let locator = &source[prefix.len()..];
    if locator.is_empty() {
        return Err(ValidationError::invalid(format!("{path}.source"), "source locator cannot be empty"));
    }
    if matches!(*prefix, "secret." | "configmap.") && locator.splitn(3, '.').filter(|segment| !segment.is_empty()).count() != 3 {
        return Err(ValidationError::invalid(
            format!("{path}.source"),
            format!("'{source}' must have the form {prefix}<namespace>.<name>.<key>"),
        ));
    }
    Ok(())
}

fn validate_precondition(precondition: &PreconditionSpec, path: &str) -> Result<(), ValidationError> {
    validate_identifier(&precondition.name, path)?;
    ensure_not_reserved(&precondition.name, path)?;

    if !precondition.conditions.is_empty() && precondition.expression.is_some() {
        return Err(ValidationError::MutuallyExclusive {
            path: path.to_string(),
            first: "conditions".to_string(),
            second: "expression".to_string(),
        });
    }
    if let Some(expression) = &precondition.expression
        && expression.trim().is_empty()
    {
        return Err(ValidationError::invalid(format!("{path}.expression"), "expression cannot be empty"));
    }
    if let Some(log) = &precondition.log {
        validate_log_action(log, &format!("{path}.log"))?;
    }
    if let Some(api_call) = &precondition.api_call {
        validate_api_call(api_call, &format!("{path}.apiCall"))?;
    }
    if !precondition.capture.is_empty() && precondition.api_call.is_none() {
        return Err(ValidationError::invalid(
            format!("{path}.capture"),
            "capture requires an apiCall to capture from",
        ));
    }

    let mut capture_names = HashSet::new();
    for (index, capture) in precondition.capture.iter().enumerate() {
        let capture_path = format!("{path}.capture[{index}]");
        validate_identifier(&capture.name, &capture_path)?;
        ensure_not_reserved(&capture.name, &capture_path)?;
        match (&capture.field, &capture.expression) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::MutuallyExclusive {
                    path: capture_path,
                    first: "field".to_string(),
                    second: "expression".to_string(),
                });
            }
            (None, None) => return Err(ValidationError::missing(capture_path, "field")),
            _ => {}
        }
        ensure_unique(&mut capture_names, "capture", &capture.name)?;
    }

    for (index, condition) in precondition.conditions.iter().enumerate() {
        if condition.field.trim().is_empty() {
            return Err(ValidationError::missing(format!("{path}.conditions[{index}]"), "field"));
        }
    }
    Ok(())
}

fn validate_log_action(log: &LogAction, path: &str) -> Result<(), ValidationError> {
    if log.message.trim().is_empty() {
        return Err(ValidationError::missing(path, "message"));
    }
    Ok(())
}

fn validate_api_call(api_call: &ApiCallSpec, path: &str) -> Result<(), ValidationError> {
    let url = api_call.url.trim();
    if url.is_empty() {
        return Err(ValidationError::missing(path, "url"));
    }
    // Templated URLs can only be checked once rendered.
    if !url.contains("{{") {
        let parsed = url::Url::parse(url).map_err(|error| ValidationError::invalid(format!("{path}.url"), error.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ValidationError::invalid(
                format!("{path}.url"),
                format!("unsupported URL scheme: {} (expected http/https)", parsed.scheme()),
            ));
        }
    }
    if let Some(timeout) = &api_call.timeout
        && parse_duration(timeout).is_none()
    {
        return Err(ValidationError::invalid(
            format!("{path}.timeout"),
            format!("'{timeout}' is not a valid duration"),
        ));
    }
    if api_call.retry_attempts == Some(0) {
        return Err(ValidationError::invalid(format!("{path}.retryAttempts"), "retryAttempts must be at least 1"));
    }
    for (index, header) in api_call.headers.iter().enumerate() {
        if header.name.trim().is_empty() {
            return Err(ValidationError::missing(format!("{path}.headers[{index}]"), "name"));
        }
    }
    Ok(())
}

fn validate_resource(resource: &ResourceSpec, path: &str) -> Result<(), ValidationError> {
    validate_identifier(&resource.name, path)?;

    match resource.transport.client {
        TransportKind::Cluster => {
            let Some(manifest) = &resource.manifest else {
                return Err(ValidationError::missing(path, "manifest"));
            };
            if !manifest.is_object() {
                return Err(ValidationError::invalid(format!("{path}.manifest"), "manifest must be a map"));
            }
            if !resource.manifests.is_empty() {
                return Err(ValidationError::invalid(
                    format!("{path}.manifests"),
                    "manifest sets require the bundle transport",
                ));
            }
            if !resource.nested_discoveries.is_empty() {
                return Err(ValidationError::invalid(
                    format!("{path}.nestedDiscoveries"),
                    "nested discoveries require the bundle transport",
                ));
            }
        }
        TransportKind::Bundle => {
            if resource.transport.target.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                return Err(ValidationError::missing(format!("{path}.transport"), "target"));
            }
            if resource.manifest.is_some() {
                return Err(ValidationError::invalid(
                    format!("{path}.manifest"),
                    "bundle resources declare their content under 'manifests'",
                ));
            }
            if resource.manifests.is_empty() {
                return Err(ValidationError::missing(path, "manifests"));
            }
            let mut manifest_names = HashSet::new();
            for (index, named) in resource.manifests.iter().enumerate() {
                let manifest_path = format!("{path}.manifests[{index}]");
                if named.name.trim().is_empty() {
                    return Err(ValidationError::missing(manifest_path, "name"));
                }
                if !named.manifest.is_object() {
                    return Err(ValidationError::invalid(format!("{manifest_path}.manifest"), "manifest must be a map"));
                }
                ensure_unique(&mut manifest_names, "bundle manifest", &named.name)?;
            }
            for (index, nested) in resource.nested_discoveries.iter().enumerate() {
                let nested_path = format!("{path}.nestedDiscoveries[{index}]");
                validate_identifier(&nested.name, &nested_path)?;
                validate_discovery(&nested.discovery, &format!("{nested_path}.discovery"))?;
            }
        }
    }

    if let Some(discovery) = &resource.discovery {
        validate_discovery(discovery, &format!("{path}.discovery"))?;
    }
    Ok(())
}

fn validate_discovery(discovery: &DiscoverySpec, path: &str) -> Result<(), ValidationError> {
    match (&discovery.by_name, &discovery.by_selectors) {
        (Some(_), Some(_)) => Err(ValidationError::MutuallyExclusive {
            path: path.to_string(),
            first: "byName".to_string(),
            second: "bySelectors".to_string(),
        }),
        (None, None) => Err(ValidationError::missing(path, "byName")),
        (Some(name), None) if name.trim().is_empty() => Err(ValidationError::invalid(format!("{path}.byName"), "name cannot be empty")),
        (None, Some(selectors)) if selectors.label_selector.is_empty() => Err(ValidationError::invalid(
            format!("{path}.bySelectors"),
            "labelSelector must declare at least one label",
        )),
        _ => Ok(()),
    }
}
