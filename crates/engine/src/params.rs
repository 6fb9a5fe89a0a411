//! Parameter extraction.
//!
//! Each declared parameter is read from its source, defaulted when missing,
//! and coerced to its declared type. A required parameter with no value fails
//! the phase. An optional parameter whose value cannot be converted falls
//! back to its default with a warning.

use adapter_types::{ParameterSpec, ParameterType};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::{
    error::{ErrorKind, ExecutorError},
    field_paths,
    result::ExecutionPhase,
    value_store::{ValueStore, ValueStoreError},
};

/// Where a parameter value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource<'a> {
    Event(&'a str),
    Env(&'a str),
    Secret(&'a str),
    ConfigMap(&'a str),
}

impl<'a> ParameterSource<'a> {
    pub fn parse(source: &'a str) -> Option<Self> {
        let source = source.trim();
        if let Some(path) = source.strip_prefix("event.") {
            return Some(ParameterSource::Event(path));
        }
        if let Some(name) = source.strip_prefix("env.") {
            return Some(ParameterSource::Env(name));
        }
        if let Some(path) = source.strip_prefix("secret.") {
            return Some(ParameterSource::Secret(path));
        }
        source.strip_prefix("configmap.").map(ParameterSource::ConfigMap)
    }
}

/// Extracts all parameters in declaration order.
pub async fn extract_params(
    specs: &[ParameterSpec],
    event: &Value,
    value_store: Option<&dyn ValueStore>,
) -> Result<Map<String, Value>, ExecutorError> {
    let mut params = Map::new();
    for spec in specs {
        if let Some(value) = extract_param(spec, event, value_store).await? {
            params.insert(spec.name.clone(), value);
        }
    }
    debug!(count = params.len(), "parameters extracted");
    Ok(params)
}

async fn extract_param(spec: &ParameterSpec, event: &Value, value_store: Option<&dyn ValueStore>) -> Result<Option<Value>, ExecutorError> {
    let fail = |message: String| ExecutorError::new(ExecutionPhase::ParamExtraction, &spec.name, ErrorKind::Parameter, message);

    let source = ParameterSource::parse(&spec.source).ok_or_else(|| fail(format!("unsupported parameter source '{}'", spec.source)))?;
    let raw = match read_source(source, event, value_store).await {
        Ok(raw) => raw,
        Err(message) if spec.required => return Err(fail(message)),
        Err(message) => {
            warn!(param = %spec.name, error = %message, "optional parameter source failed; using default");
            None
        }
    };

    let Some(raw) = raw.filter(|value| !value.is_null()) else {
        return match &spec.default {
            Some(default) => coerce_param(default, spec.r#type)
                .map(Some)
                .map_err(|reason| fail(format!("default value cannot be converted: {reason}"))),
            None if spec.required => Err(fail(format!("required parameter is missing from {}", spec.source))),
            None => Ok(None),
        };
    };

    match coerce_param(&raw, spec.r#type) {
        Ok(value) => Ok(Some(value)),
        Err(reason) if spec.required => Err(fail(reason)),
        Err(reason) => {
            warn!(param = %spec.name, error = %reason, "optional parameter could not be converted; using default");
            match &spec.default {
                Some(default) => coerce_param(default, spec.r#type)
                    .map(Some)
                    .map_err(|reason| fail(format!("default value cannot be converted: {reason}"))),
                None => Ok(None),
            }
        }
    }
}

async fn read_source(source: ParameterSource<'_>, event: &Value, value_store: Option<&dyn ValueStore>) -> Result<Option<Value>, String> {
    match source {
        ParameterSource::Event(path) => Ok(field_paths::lookup(event, path).cloned()),
        ParameterSource::Env(name) => Ok(std::env::var(name).ok().map(Value::String)),
        ParameterSource::Secret(path) | ParameterSource::ConfigMap(path) => {
            let store = value_store.ok_or_else(|| "no value store is configured".to_string())?;
            let lookup = match source {
                ParameterSource::Secret(_) => store.extract_from_secret(path).await,
                _ => store.extract_from_config_map(path).await,
            };
            match lookup {
                Ok(value) => Ok(Some(Value::String(value))),
                Err(ValueStoreError::NotFound { .. }) => Ok(None),
                Err(error) => Err(error.to_string()),
            }
        }
    }
}

/// Converts a raw value into the declared parameter type; untyped values pass through.
pub fn coerce_param(value: &Value, target: Option<ParameterType>) -> Result<Value, String> {
    let Some(target) = target else {
        return Ok(value.clone());
    };
    match target {
        ParameterType::String => Ok(Value::String(match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            other => other.to_string(),
        })),
        ParameterType::Int => to_int(value).map(|integer| Value::Number(integer.into())),
        ParameterType::Float => to_float(value).and_then(|float| {
            Number::from_f64(float)
                .map(Value::Number)
                .ok_or_else(|| format!("{float} is not a finite number"))
        }),
        ParameterType::Bool => to_bool(value).map(Value::Bool),
    }
}

fn to_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                return Ok(integer);
            }
            match number.as_f64() {
                Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => Ok(float as i64),
                _ => Err(format!("{number} is not an integer")),
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Ok(integer);
            }
            match trimmed.parse::<f64>() {
                Ok(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => Ok(float as i64),
                _ => Err(format!("cannot convert '{text}' to int")),
            }
        }
        Value::Bool(flag) => Ok(i64::from(*flag)),
        other => Err(format!("cannot convert {} to int", crate::criteria::type_name(other))),
    }
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(|| format!("{number} is out of range")),
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| format!("cannot convert '{text}' to float")),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        other => Err(format!("cannot convert {} to float", crate::criteria::type_name(other))),
    }
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("cannot convert '{text}' to bool")),
        },
        Value::Number(number) => Ok(number.as_f64().is_some_and(|float| float != 0.0)),
        other => Err(format!("cannot convert {} to bool", crate::criteria::type_name(other))),
    }
}
