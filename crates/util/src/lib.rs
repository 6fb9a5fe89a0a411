//! Shared helpers for the adapter engine: the outbound HTTP client and log redaction.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod http;

pub use http::{HttpClient, HttpError, HttpResponse, ReqwestHttpClient, RequestOptions, RetryPolicy};

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Returns true when a header name usually carries credentials.
pub fn is_sensitive_header(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered == "authorization" || lowered.contains("token") || lowered.contains("secret") || lowered.contains("api-key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_query_tokens_and_bearer_values() {
        let redacted = redact_sensitive("https://api.example.com/x?API_TOKEN=abc123&mode=fast");
        assert_eq!(redacted, "https://api.example.com/x?API_TOKEN=<redacted>&mode=fast");

        let redacted = redact_sensitive("Bearer eyJhbGciOi");
        assert_eq!(redacted, "Bearer <redacted>");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(redact_sensitive("cluster c1 is ready"), "cluster c1 is ready");
    }

    #[test]
    fn detects_sensitive_headers() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("X-Api-Key"));
        assert!(!is_sensitive_header("Content-Type"));
    }
}
