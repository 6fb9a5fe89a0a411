//! Rendering and execution of configured API calls.

use std::time::Duration;

use adapter_types::{ApiCallSpec, parse_duration};
use adapter_util::{HttpClient, HttpError, HttpResponse, RequestOptions, RetryPolicy, redact_sensitive};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    scope::{ExecutionScope, Interrupted},
    template::{self, TemplateError},
};

#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error("failed to render {field}: {source}")]
    Render {
        field: String,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{method} {url} returned {status}")]
    Status { method: String, url: String, status: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ApiCallError {
    fn render(field: impl Into<String>, source: TemplateError) -> Self {
        ApiCallError::Render {
            field: field.into(),
            source,
        }
    }
}

/// Fully rendered request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedApiCall {
    pub url: String,
    pub options: RequestOptions,
}

/// Renders url, headers, and body against `vars` and resolves timeout and retry settings.
pub fn render_api_call(spec: &ApiCallSpec, vars: &Map<String, Value>, default_timeout: Duration) -> Result<RenderedApiCall, ApiCallError> {
    let url = template::render(&spec.url, vars).map_err(|error| ApiCallError::render("url", error))?;

    let mut options = RequestOptions::default();
    for header in &spec.headers {
        let value = template::render(&header.value, vars).map_err(|error| ApiCallError::render(format!("header '{}'", header.name), error))?;
        options.headers.insert(header.name.clone(), value);
    }
    if let Some(body) = &spec.body {
        options.body = Some(template::render(body, vars).map_err(|error| ApiCallError::render("body", error))?);
    }
    options.timeout = Some(spec.timeout.as_deref().and_then(parse_duration).unwrap_or(default_timeout));
    options.retry = RetryPolicy::new(spec.retry_attempts.unwrap_or(1), spec.retry_backoff.unwrap_or_default());
    Ok(RenderedApiCall { url, options })
}

/// Renders and sends an API call within `scope`; any non-2xx final status is an error.
pub async fn execute_api_call(
    http: &dyn HttpClient,
    spec: &ApiCallSpec,
    vars: &Map<String, Value>,
    scope: &ExecutionScope,
    default_timeout: Duration,
) -> Result<HttpResponse, ApiCallError> {
    let rendered = render_api_call(spec, vars, default_timeout)?;
    debug!(method = %spec.method, url = %redact_sensitive(&rendered.url), "executing api call");
    let response = scope.run(http.request(spec.method, &rendered.url, &rendered.options)).await??;
    if !response.is_success() {
        return Err(ApiCallError::Status {
            method: spec.method.to_string(),
            url: redact_sensitive(&rendered.url),
            status: response.status.clone(),
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHttpClient;
    use adapter_types::{BackoffStrategy, HeaderSpec, HttpMethod};
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let Value::Object(map) = json!({"clusterId": "c1", "token": "abc"}) else {
            unreachable!()
        };
        map
    }

    fn spec() -> ApiCallSpec {
        ApiCallSpec {
            method: HttpMethod::Post,
            url: "https://api.example.com/clusters/{{ .clusterId }}".into(),
            headers: vec![HeaderSpec {
                name: "Authorization".into(),
                value: "Bearer {{ .token }}".into(),
            }],
            body: Some(r#"{"id": "{{ .clusterId }}"}"#.into()),
            timeout: Some("5s".into()),
            retry_attempts: Some(3),
            retry_backoff: Some(BackoffStrategy::Linear),
        }
    }

    #[test]
    fn renders_every_templated_field() {
        let rendered = render_api_call(&spec(), &vars(), Duration::from_secs(10)).unwrap();
        assert_eq!(rendered.url, "https://api.example.com/clusters/c1");
        assert_eq!(rendered.options.headers["Authorization"], "Bearer abc");
        assert_eq!(rendered.options.body.as_deref(), Some(r#"{"id": "c1"}"#));
        assert_eq!(rendered.options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(rendered.options.retry.attempts, 3);
        assert_eq!(rendered.options.retry.backoff, BackoffStrategy::Linear);
    }

    #[test]
    fn falls_back_to_default_timeout_and_single_attempt() {
        let spec = ApiCallSpec {
            url: "https://api.example.com".into(),
            ..Default::default()
        };
        let rendered = render_api_call(&spec, &vars(), Duration::from_secs(10)).unwrap();
        assert_eq!(rendered.options.timeout, Some(Duration::from_secs(10)));
        assert_eq!(rendered.options.retry.max_attempts(), 1);
    }

    #[test]
    fn render_failures_name_the_field() {
        let spec = ApiCallSpec {
            url: "https://api.example.com/{{ .missing }}".into(),
            ..Default::default()
        };
        let error = render_api_call(&spec, &vars(), Duration::from_secs(1)).unwrap_err();
        assert!(error.to_string().starts_with("failed to render url"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let http = FakeHttpClient::new().respond("https://api.example.com/clusters/c1", 503, "{}");
        let error = execute_api_call(&http, &spec(), &vars(), &ExecutionScope::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, ApiCallError::Status { .. }));
    }

    #[tokio::test]
    async fn successful_calls_return_the_response() {
        let http = FakeHttpClient::new().respond("https://api.example.com/clusters/c1", 200, r#"{"ok": true}"#);
        let response = execute_api_call(&http, &spec(), &vars(), &ExecutionScope::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.json().unwrap()["ok"], true);
        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].options.headers["Authorization"], "Bearer abc");
    }
}
