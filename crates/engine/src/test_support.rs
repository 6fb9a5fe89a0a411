//! Test doubles shared by the unit tests.

use std::{sync::Mutex, time::Duration};

use adapter_types::HttpMethod;
use adapter_util::{HttpClient, HttpError, HttpResponse, RequestOptions};
use async_trait::async_trait;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub options: RequestOptions,
}

/// Canned responses keyed by URL; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct FakeHttpClient {
    responses: IndexMap<String, (u16, String)>,
    failures: IndexMap<String, String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, status_code: u16, body: &str) -> Self {
        self.responses.insert(url.to_string(), (status_code, body.to_string()));
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.failures.insert(url.to_string(), message.to_string());
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn request(&self, method: HttpMethod, url: &str, options: &RequestOptions) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            options: options.clone(),
        });
        if let Some(message) = self.failures.get(url) {
            return Err(HttpError::Request {
                url: url.to_string(),
                attempts: options.retry.max_attempts(),
                message: message.clone(),
            });
        }
        let (status_code, body) = self.responses.get(url).cloned().unwrap_or((404, String::new()));
        Ok(HttpResponse {
            status_code,
            status: status_code.to_string(),
            body,
            attempts: 1,
            duration: Duration::ZERO,
        })
    }
}
