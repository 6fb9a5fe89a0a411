//! Outbound HTTP client used by preconditions and post-actions.
//!
//! [`HttpClient`] is the narrow request/response seam the engine depends on;
//! [`ReqwestHttpClient`] is the production implementation with per-attempt
//! timeouts and retry/backoff.

mod client;
mod retry;

pub use client::ReqwestHttpClient;
pub use retry::RetryPolicy;

use std::time::Duration;

use adapter_types::HttpMethod;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

/// Default per-attempt timeout when a call does not configure one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Request { url: String, attempts: u32, message: String },

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("could not build HTTP client: {0}")]
    Build(String),
}

/// Per-request options: headers, body, timeout, and retry behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
    /// Per-attempt timeout; the client default applies when `None`.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Final response of a (possibly retried) request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    /// Status line, e.g. `"200 OK"`.
    pub status: String,
    pub body: String,
    pub attempts: u32,
    pub duration: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decodes the body as JSON; an empty body decodes to `null`.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
    }
}

/// Request/response seam for outbound calls.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request, retrying per `options.retry`, and returns the final response.
    ///
    /// Non-2xx responses are returned as `Ok`; callers decide whether a status is acceptable.
    async fn request(&self, method: HttpMethod, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError>;

    async fn get(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.request(HttpMethod::Get, url, options).await
    }

    async fn post(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.request(HttpMethod::Post, url, options).await
    }

    async fn put(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.request(HttpMethod::Put, url, options).await
    }

    async fn patch(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.request(HttpMethod::Patch, url, options).await
    }

    async fn delete(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.request(HttpMethod::Delete, url, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status_code: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status_code,
            status: status_code.to_string(),
            body: body.to_string(),
            attempts: 1,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn success_covers_2xx_only() {
        assert!(response(200, "").is_success());
        assert!(response(204, "").is_success());
        assert!(!response(301, "").is_success());
        assert!(!response(404, "").is_success());
    }

    #[test]
    fn json_decodes_empty_body_as_null() {
        assert_eq!(response(204, "  ").json().unwrap(), Value::Null);
        assert_eq!(response(200, r#"{"a":1}"#).json().unwrap()["a"], 1);
        assert!(response(200, "not json").json().is_err());
    }
}
