//! Precondition phase.
//!
//! Preconditions run in order. Each may log, call an API, capture fields from
//! the response, and then gate on conditions or an expression. Captures are
//! evaluated against the API response alone; conditions see the full
//! variable set (params, earlier responses, captures, `adapter`, `resources`).
//! The first precondition that does not match stops the phase.

use adapter_types::{CaptureField, LogAction, PreconditionSpec};
use adapter_util::HttpClient;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    api_call::{ApiCallError, execute_api_call},
    context::{EvaluationRecord, ExecutionContext},
    criteria::{CriteriaError, Evaluator},
    error::{ErrorKind, ExecutorError},
    field_paths,
    options::EngineOptions,
    result::{ExecutionPhase, ExecutionStatus, PreconditionResult},
    scope::ExecutionScope,
    template,
};

/// Aggregate result of the precondition phase.
#[derive(Debug, Default)]
pub struct PreconditionsOutcome {
    pub results: Vec<PreconditionResult>,
    /// True when every precondition ran and matched.
    pub all_matched: bool,
    pub not_met_reason: Option<String>,
    pub error: Option<ExecutorError>,
}

pub async fn evaluate_preconditions(
    specs: &[PreconditionSpec],
    context: &mut ExecutionContext,
    http: Option<&dyn HttpClient>,
    scope: &ExecutionScope,
    options: &EngineOptions,
) -> PreconditionsOutcome {
    let mut outcome = PreconditionsOutcome {
        all_matched: true,
        ..Default::default()
    };

    for spec in specs {
        let mut result = PreconditionResult {
            name: spec.name.clone(),
            ..Default::default()
        };
        match evaluate_one(spec, context, http, scope, options, &mut result).await {
            Ok(true) => {
                debug!(precondition = %spec.name, "precondition matched");
                outcome.results.push(result);
            }
            Ok(false) => {
                let reason = format!("precondition '{}' not met", spec.name);
                info!(precondition = %spec.name, "precondition not met; resources will be skipped");
                outcome.results.push(result);
                outcome.all_matched = false;
                outcome.not_met_reason = Some(reason);
                break;
            }
            Err(error) => {
                warn!(precondition = %spec.name, error = %error, "precondition failed");
                result.status = ExecutionStatus::Failed;
                result.error = Some(error.message.clone());
                outcome.results.push(result);
                outcome.all_matched = false;
                outcome.error = Some(error);
                break;
            }
        }
    }
    outcome
}

async fn evaluate_one(
    spec: &PreconditionSpec,
    context: &mut ExecutionContext,
    http: Option<&dyn HttpClient>,
    scope: &ExecutionScope,
    options: &EngineOptions,
    result: &mut PreconditionResult,
) -> Result<bool, ExecutorError> {
    let phase = ExecutionPhase::Preconditions;
    if let Some(log) = &spec.log {
        emit_log(log, &context.evaluation_vars(), &spec.name);
    }

    if let Some(api_call) = &spec.api_call {
        let http = http.ok_or_else(|| missing_http_client(phase, &spec.name))?;
        let vars = context.evaluation_vars();
        result.api_call_made = true;
        let response = execute_api_call(http, api_call, &vars, scope, options.default_http_timeout)
            .await
            .map_err(|error| api_call_error(phase, &spec.name, error))?;
        let body = response
            .json()
            .map_err(|error| ExecutorError::from_source(phase, &spec.name, ErrorKind::Http, error))?;

        let captured = capture_fields(&spec.capture, &body)
            .map_err(|error| ExecutorError::from_source(phase, &spec.name, ErrorKind::Evaluation, error))?;
        context.params.insert(spec.name.clone(), body.clone());
        for (name, value) in &captured {
            context.params.insert(name.clone(), value.clone());
        }
        result.api_response = Some(body);
        result.captured_fields = captured;
    }

    let vars = context.evaluation_vars();
    let evaluator = Evaluator::new(&vars);
    let to_error = |error: CriteriaError| ExecutorError::from_source(phase, &spec.name, ErrorKind::Evaluation, error);

    let mut record = EvaluationRecord {
        phase,
        name: spec.name.clone(),
        matched: true,
        field_results: Vec::new(),
        expression: None,
    };
    if let Some(expression) = &spec.expression {
        let evaluated = evaluator.evaluate_expression(expression).map_err(to_error)?;
        record.matched = evaluated.matched;
        record.expression = Some(expression.clone());
        result.expression_result = Some(evaluated.value);
    } else if !spec.conditions.is_empty() {
        let evaluated = evaluator.evaluate_conditions(&spec.conditions).map_err(to_error)?;
        record.matched = evaluated.matched;
        record.field_results = evaluated.results.clone();
        result.condition_results = evaluated.results;
    }

    result.matched = record.matched;
    context.evaluations.push(record);
    Ok(result.matched)
}

/// Evaluates captures against the response body only.
///
/// A `field` capture that does not resolve is skipped with a warning; a failing `expression` is an error.
pub fn capture_fields(captures: &[CaptureField], response: &Value) -> Result<Map<String, Value>, CriteriaError> {
    let mut captured = Map::new();
    if captures.is_empty() {
        return Ok(captured);
    }
    let response_vars = match response {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let evaluator = Evaluator::new(&response_vars);
    for capture in captures {
        let value = match (&capture.field, &capture.expression) {
            (Some(field), _) => field_paths::lookup(response, field).cloned(),
            (None, Some(expression)) => Some(evaluator.evaluate_value(expression)?),
            (None, None) => None,
        };
        match value {
            Some(value) => {
                captured.insert(capture.name.clone(), value);
            }
            None => warn!(capture = %capture.name, "capture field not found in response"),
        }
    }
    Ok(captured)
}

pub(crate) fn api_call_error(phase: ExecutionPhase, step: &str, error: ApiCallError) -> ExecutorError {
    let kind = match &error {
        ApiCallError::Render { .. } => ErrorKind::Template,
        ApiCallError::Interrupted(_) => ErrorKind::Cancelled,
        ApiCallError::Http(_) | ApiCallError::Status { .. } => ErrorKind::Http,
    };
    ExecutorError::from_source(phase, step, kind, error)
}

pub(crate) fn missing_http_client(phase: ExecutionPhase, step: &str) -> ExecutorError {
    ExecutorError::new(phase, step, ErrorKind::Http, "no HTTP client is configured")
}

/// Renders and emits a configured log action; a render failure is logged, not raised.
pub(crate) fn emit_log(log: &LogAction, vars: &Map<String, Value>, step: &str) {
    let message = match template::render(&log.message, vars) {
        Ok(message) => message,
        Err(error) => {
            warn!(step, error = %error, "failed to render log message");
            return;
        }
    };
    match log.level {
        adapter_types::LogLevel::Debug => debug!(step, "{message}"),
        adapter_types::LogLevel::Info => info!(step, "{message}"),
        adapter_types::LogLevel::Warn => warn!(step, "{message}"),
        adapter_types::LogLevel::Error => tracing::error!(step, "{message}"),
    }
}
