//! Secret and config-map lookups used by parameter extraction.
//!
//! Paths have the form `namespace.name.key`; the key itself may contain dots.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueStoreError {
    #[error("invalid value path '{path}': expected namespace.name.key")]
    InvalidPath { path: String },

    #[error("value '{path}' not found")]
    NotFound { path: String },

    #[error("value store request for '{path}' failed: {message}")]
    Backend { path: String, message: String },
}

/// Parsed `namespace.name.key` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub key: &'a str,
}

impl<'a> ValuePath<'a> {
    pub fn parse(path: &'a str) -> Result<Self, ValueStoreError> {
        let mut parts = path.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), Some(key)) if !namespace.is_empty() && !name.is_empty() && !key.is_empty() => {
                Ok(Self { namespace, name, key })
            }
            _ => Err(ValueStoreError::InvalidPath { path: path.to_string() }),
        }
    }
}

/// Backing store for `secret.` and `configmap.` parameter sources.
#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn extract_from_secret(&self, path: &str) -> Result<String, ValueStoreError>;

    async fn extract_from_config_map(&self, path: &str) -> Result<String, ValueStoreError>;
}

/// In-memory store keyed by full `namespace.name.key` paths.
///
/// Deserializes from `{"secrets": {...}, "configMaps": {...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticValueStore {
    #[serde(default)]
    secrets: IndexMap<String, String>,
    #[serde(default)]
    config_maps: IndexMap<String, String>,
}

impl StaticValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(path.into(), value.into());
        self
    }

    pub fn with_config_map_value(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_maps.insert(path.into(), value.into());
        self
    }

    fn lookup(entries: &IndexMap<String, String>, path: &str) -> Result<String, ValueStoreError> {
        ValuePath::parse(path)?;
        entries
            .get(path)
            .cloned()
            .ok_or_else(|| ValueStoreError::NotFound { path: path.to_string() })
    }
}

#[async_trait]
impl ValueStore for StaticValueStore {
    async fn extract_from_secret(&self, path: &str) -> Result<String, ValueStoreError> {
        Self::lookup(&self.secrets, path)
    }

    async fn extract_from_config_map(&self, path: &str) -> Result<String, ValueStoreError> {
        Self::lookup(&self.config_maps, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_with_dotted_keys() {
        let path = ValuePath::parse("hyperfleet.api-creds.tls.crt").unwrap();
        assert_eq!(path.namespace, "hyperfleet");
        assert_eq!(path.name, "api-creds");
        assert_eq!(path.key, "tls.crt");
        assert!(ValuePath::parse("only.two").is_err());
        assert!(ValuePath::parse("a..b").is_err());
    }

    #[tokio::test]
    async fn static_store_serves_secrets_and_config_maps() {
        let store = StaticValueStore::new()
            .with_secret("ns.creds.token", "s3cret")
            .with_config_map_value("ns.settings.region", "us-east-1");
        assert_eq!(store.extract_from_secret("ns.creds.token").await.unwrap(), "s3cret");
        assert_eq!(store.extract_from_config_map("ns.settings.region").await.unwrap(), "us-east-1");
        assert_eq!(
            store.extract_from_secret("ns.settings.region").await.unwrap_err(),
            ValueStoreError::NotFound {
                path: "ns.settings.region".into()
            }
        );
        assert!(matches!(store.extract_from_secret("bad").await, Err(ValueStoreError::InvalidPath { .. })));
    }

    #[test]
    fn deserializes_from_json() {
        let store: StaticValueStore = serde_json::from_str(r#"{"secrets": {"a.b.c": "1"}}"#).unwrap();
        assert_eq!(store.secrets.get("a.b.c").map(String::as_str), Some("1"));
        assert!(store.config_maps.is_empty());
    }
}
