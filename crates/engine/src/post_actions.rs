//! Post-action phase.
//!
//! Payloads are built first and stored in params as JSON strings, so actions
//! can reference them from templates. Actions then run in order; the first
//! failing action stops the rest.

use adapter_types::{PostActionSpec, PostConfig};
use adapter_util::HttpClient;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    api_call::execute_api_call,
    context::ExecutionContext,
    error::{ErrorKind, ExecutorError},
    options::EngineOptions,
    payload::build_payload_string,
    preconditions::{api_call_error, emit_log, missing_http_client},
    result::{ExecutionPhase, ExecutionStatus, PostActionResult},
    scope::ExecutionScope,
};

#[derive(Debug, Default)]
pub struct PostActionsOutcome {
    pub results: Vec<PostActionResult>,
    pub error: Option<ExecutorError>,
}

/// Builds every payload into params; the first failure aborts before any action runs.
pub fn build_payloads(post: &PostConfig, context: &mut ExecutionContext) -> Result<(), ExecutorError> {
    for payload in &post.payloads {
        let vars = context.evaluation_vars();
        let built = build_payload_string(&payload.build, &vars)
            .map_err(|error| ExecutorError::from_source(ExecutionPhase::PostActions, &payload.name, ErrorKind::Template, error))?;
        debug!(payload = %payload.name, "built payload");
        context.params.insert(payload.name.clone(), Value::String(built));
    }
    Ok(())
}

pub async fn execute_post_actions(
    post: &PostConfig,
    context: &mut ExecutionContext,
    http: Option<&dyn HttpClient>,
    scope: &ExecutionScope,
    options: &EngineOptions,
) -> PostActionsOutcome {
    let mut outcome = PostActionsOutcome::default();
    if let Err(error) = build_payloads(post, context) {
        warn!(payload = %error.step, error = %error, "payload build failed; skipping post-actions");
        outcome.error = Some(error);
        return outcome;
    }

    for action in &post.post_actions {
        let mut result = PostActionResult {
            name: action.name.clone(),
            ..Default::default()
        };
        match execute_one(action, context, http, scope, options, &mut result).await {
            Ok(()) => outcome.results.push(result),
            Err(error) => {
                warn!(post_action = %action.name, error = %error, "post-action failed");
                result.status = ExecutionStatus::Failed;
                result.error = Some(error.message.clone());
                outcome.results.push(result);
                outcome.error = Some(error);
                break;
            }
        }
    }
    outcome
}

async fn execute_one(
    action: &PostActionSpec,
    context: &ExecutionContext,
    http: Option<&dyn HttpClient>,
    scope: &ExecutionScope,
    options: &EngineOptions,
    result: &mut PostActionResult,
) -> Result<(), ExecutorError> {
    let phase = ExecutionPhase::PostActions;
    let vars = context.evaluation_vars();
    if let Some(log) = &action.log {
        emit_log(log, &vars, &action.name);
    }
    let Some(api_call) = &action.api_call else {
        return Ok(());
    };

    let http = http.ok_or_else(|| missing_http_client(phase, &action.name))?;
    result.api_call_made = true;
    let response = execute_api_call(http, api_call, &vars, scope, options.default_http_timeout)
        .await
        .map_err(|error| api_call_error(phase, &action.name, error))?;
    result.http_status = Some(response.status_code);
    result.api_response = Some(response.json().unwrap_or_else(|_| Value::String(response.body.clone())));
    debug!(post_action = %action.name, status = response.status_code, attempts = response.attempts, "post-action call completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scope::Correlation, test_support::FakeHttpClient};
    use adapter_types::{ApiCallSpec, HttpMethod, PayloadSpec};
    use serde_json::json;

    const STATUS_URL: &str = "https://api.example.com/clusters/c1/statuses";

    fn context() -> ExecutionContext {
        let mut context = ExecutionContext::new("cluster-adapter", json!({}), Correlation::default());
        context.params.insert("clusterId".into(), json!("c1"));
        context
    }

    fn report(name: &str) -> PostActionSpec {
        PostActionSpec {
            name: name.into(),
            log: None,
            api_call: Some(ApiCallSpec {
                method: HttpMethod::Post,
                url: "https://api.example.com/clusters/{{ .clusterId }}/statuses".into(),
                body: Some("{{ .statusPayload }}".into()),
                ..Default::default()
            }),
        }
    }

    fn post_config(actions: Vec<PostActionSpec>) -> PostConfig {
        PostConfig {
            payloads: vec![PayloadSpec {
                name: "statusPayload".into(),
                build: json!({
                    "clusterId": "{{ .clusterId }}",
                    "status": {"field": "adapter.executionStatus"},
                    "skipped": {"field": "adapter.resourcesSkipped"}
                }),
            }],
            post_actions: actions,
        }
    }

    async fn run(post: &PostConfig, http: &FakeHttpClient, context: &mut ExecutionContext) -> PostActionsOutcome {
        execute_post_actions(post, context, Some(http as &dyn HttpClient), &ExecutionScope::new(), &EngineOptions::default()).await
    }

    #[tokio::test]
    async fn sends_built_payloads() {
        let http = FakeHttpClient::new().respond(STATUS_URL, 201, r#"{"accepted": true}"#);
        let mut context = context();
        let outcome = run(&post_config(vec![report("reportStatus")]), &http, &mut context).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results[0].http_status, Some(201));
        assert_eq!(outcome.results[0].api_response, Some(json!({"accepted": true})));

        let sent: Value = serde_json::from_str(http.requests()[0].options.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({"clusterId": "c1", "status": "success", "skipped": false}));
        assert!(context.params["statusPayload"].is_string());
    }

    #[tokio::test]
    async fn non_json_responses_are_kept_as_text() {
        let http = FakeHttpClient::new().respond(STATUS_URL, 200, "accepted");
        let outcome = run(&post_config(vec![report("reportStatus")]), &http, &mut context()).await;
        assert_eq!(outcome.results[0].api_response, Some(json!("accepted")));
    }

    #[tokio::test]
    async fn first_failure_stops_remaining_actions() {
        let http = FakeHttpClient::new().respond(STATUS_URL, 503, "unavailable");
        let outcome = run(&post_config(vec![report("first"), report("second")]), &http, &mut context()).await;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].status, ExecutionStatus::Failed);
        let error = outcome.error.unwrap();
        assert_eq!(error.phase, ExecutionPhase::PostActions);
        assert_eq!(error.step, "first");
        assert_eq!(error.kind, ErrorKind::Http);
    }

    #[tokio::test]
    async fn payload_failure_runs_no_actions() {
        let http = FakeHttpClient::new().respond(STATUS_URL, 200, "{}");
        let mut post = post_config(vec![report("reportStatus")]);
        post.payloads[0].build = json!({"missing": "{{ .notAParam }}"});
        let outcome = run(&post, &http, &mut context()).await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error.unwrap().step, "statusPayload");
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn log_only_actions_need_no_client() {
        let post = PostConfig {
            payloads: Vec::new(),
            post_actions: vec![PostActionSpec {
                name: "announce".into(),
                log: Some(adapter_types::LogAction {
                    message: "cluster {{ .clusterId }} done".into(),
                    level: adapter_types::LogLevel::Info,
                }),
                api_call: None,
            }],
        };
        let outcome = execute_post_actions(&post, &mut context(), None, &ExecutionScope::new(), &EngineOptions::default()).await;
        assert!(outcome.error.is_none());
        assert!(!outcome.results[0].api_call_made);
    }
}
