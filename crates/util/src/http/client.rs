//! `reqwest`-backed [`HttpClient`] implementation.

use std::time::{Duration, Instant};

use adapter_types::HttpMethod;
use async_trait::async_trait;
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing::{debug, warn};

use super::{DEFAULT_REQUEST_TIMEOUT, HttpClient, HttpError, HttpResponse, RequestOptions, RetryPolicy};
use crate::redact_sensitive;

/// Production HTTP client with per-attempt timeouts and retry/backoff.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    http: Client,
    default_timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_default_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Result<Self, HttpError> {
        let http = Client::builder()
            .connect_timeout(default_timeout)
            .user_agent(format!("adapter-engine/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| HttpError::Build(error.to_string()))?;
        Ok(Self { http, default_timeout })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        options: &RequestOptions,
    ) -> Result<(u16, String, String), String> {
        let mut builder = self
            .http
            .request(method, url)
            .headers(headers.clone())
            .timeout(options.timeout.unwrap_or(self.default_timeout));
        if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.map_err(|error| error.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|error| error.to_string())?;
        Ok((status.as_u16(), status.to_string(), body))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(&self, method: HttpMethod, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        let headers = build_header_map(options)?;
        let reqwest_method = to_reqwest_method(method);
        let max_attempts = options.retry.max_attempts();
        let started_at = Instant::now();
        let redacted_url = redact_sensitive(url);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(method = %method, url = %redacted_url, attempt, max_attempts, "sending HTTP request");
            match self.send_once(reqwest_method.clone(), url, &headers, options).await {
                Ok((status_code, status, body)) => {
                    if RetryPolicy::is_retryable_status(status_code) && attempt < max_attempts {
                        let delay = options.retry.delay_after(attempt);
                        warn!(url = %redacted_url, status_code, attempt, delay_ms = delay.as_millis() as u64, "retrying HTTP request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Ok(HttpResponse {
                        status_code,
                        status,
                        body,
                        attempts: attempt,
                        duration: started_at.elapsed(),
                    });
                }
                Err(message) => {
                    if attempt < max_attempts {
                        let delay = options.retry.delay_after(attempt);
                        warn!(url = %redacted_url, error = %message, attempt, delay_ms = delay.as_millis() as u64, "retrying HTTP request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(HttpError::Request {
                        url: redacted_url,
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn build_header_map(options: &RequestOptions) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| HttpError::InvalidHeader {
            name: name.clone(),
            message: error.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|error| HttpError::InvalidHeader {
            name: name.clone(),
            message: error.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    if options.body.is_some() && !headers.contains_key(reqwest::header::CONTENT_TYPE) {
        headers.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_types::BackoffStrategy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retrying(attempts: u32) -> RequestOptions {
        RequestOptions {
            retry: RetryPolicy {
                attempts,
                backoff: BackoffStrategy::Constant,
                base_delay: Duration::from_millis(1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn header_map_defaults_json_content_type_for_bodies() {
        let mut options = RequestOptions {
            body: Some("{}".into()),
            ..Default::default()
        };
        let headers = build_header_map(&options).unwrap();
        assert_eq!(headers.get("content-type").unwrap(), "application/json");

        options.headers.insert("Content-Type".into(), "text/plain".into());
        let headers = build_header_map(&options).unwrap();
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn header_map_rejects_invalid_names() {
        let mut options = RequestOptions::default();
        options.headers.insert("bad header".into(), "x".into());
        assert!(matches!(build_header_map(&options), Err(HttpError::InvalidHeader { .. })));
    }

    #[tokio::test]
    async fn unreachable_host_reports_all_attempts() {
        let client = ReqwestHttpClient::with_default_timeout(Duration::from_millis(200)).unwrap();
        let error = client.get("http://127.0.0.1:1/unreachable", &retrying(2)).await.unwrap_err();
        match error {
            HttpError::Request { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clusters/c1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clusters/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": {"phase": "Ready"}})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let response = client.get(&format!("{}/clusters/c1", mock_server.uri()), &retrying(3)).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.status_code, 200);
        assert_eq!(response.attempts, 2);
        assert_eq!(response.json().unwrap()["status"]["phase"], "Ready");
    }

    #[tokio::test]
    async fn throttling_stops_after_the_last_attempt() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/statuses"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let response = client.post(&format!("{}/statuses", mock_server.uri()), &retrying(3)).await.unwrap();

        assert_eq!(response.status_code, 429);
        assert_eq!(response.attempts, 3);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let response = client.get(&format!("{}/missing", mock_server.uri()), &retrying(3)).await.unwrap();

        assert_eq!(response.status_code, 404);
        assert_eq!(response.attempts, 1);
    }
}
