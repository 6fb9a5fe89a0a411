//! Engine tuning knobs.

use std::time::Duration;

use adapter_util::http::DEFAULT_REQUEST_TIMEOUT;
use serde::{Deserialize, Serialize};

/// What to do when looking up an existing resource fails for a reason other than "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryErrorPolicy {
    /// Fail the resource.
    #[default]
    Fail,
    /// Log a warning and treat the resource as absent, which leads to a create.
    ProceedAsMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    /// Delay between existence checks while waiting for a recreate's delete to finish.
    #[serde(with = "millis")]
    pub recreate_poll_interval: Duration,
    /// Upper bound on that wait; the execution scope deadline still applies.
    #[serde(with = "millis")]
    pub recreate_timeout: Duration,
    pub discovery_error_policy: DiscoveryErrorPolicy,
    /// Per-attempt timeout for API calls that do not configure one.
    #[serde(with = "millis")]
    pub default_http_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            recreate_poll_interval: Duration::from_millis(100),
            recreate_timeout: Duration::from_secs(60),
            discovery_error_policy: DiscoveryErrorPolicy::default(),
            default_http_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.recreate_poll_interval, Duration::from_millis(100));
        assert_eq!(options.recreate_timeout, Duration::from_secs(60));
        assert_eq!(options.discovery_error_policy, DiscoveryErrorPolicy::Fail);
        assert_eq!(options.default_http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options: EngineOptions = serde_json::from_str(r#"{"recreatePollInterval": 250, "discoveryErrorPolicy": "proceedAsMissing"}"#).unwrap();
        assert_eq!(options.recreate_poll_interval, Duration::from_millis(250));
        assert_eq!(options.discovery_error_policy, DiscoveryErrorPolicy::ProceedAsMissing);
        assert_eq!(options.recreate_timeout, Duration::from_secs(60));
    }
}
