//! # Resource Transports
//!
//! The engine talks to resource backends through two seams:
//!
//! - [`ResourceTransport`]: a cluster API holding individual documents addressed by
//!   apiVersion, kind, namespace, and name.
//! - [`BundleTransport`]: a delivery API that accepts a bundle of manifests for a
//!   named target and reports back what was delivered.
//!
//! In-memory implementations live in [`memory`]; they back the CLI's offline mode
//! and the engine's tests.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use memory::{MemoryBundleTransport, MemoryTransport};

/// Exact-match label selector.
pub type LabelSelector = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict updating {kind} '{name}': {message}")]
    Conflict { kind: String, name: String, message: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound { .. })
    }
}

/// API group, version, and kind of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Splits `apiVersion` (`group/version` or a core `version`) and pairs it with `kind`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Address of a single cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    /// Builds a key from a document's `apiVersion`, `kind`, and `metadata`.
    pub fn of(document: &Value) -> Option<Self> {
        let api_version = document.get("apiVersion")?.as_str()?;
        let kind = document.get("kind")?.as_str()?;
        let metadata = document.get("metadata")?;
        let name = metadata.get("name")?.as_str()?;
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|namespace| !namespace.is_empty())
            .map(str::to_string);
        Some(Self {
            gvk: GroupVersionKind::from_api_version(api_version, kind),
            namespace,
            name: name.to_string(),
        })
    }

    pub fn not_found(&self) -> TransportError {
        TransportError::NotFound {
            kind: self.gvk.kind.clone(),
            name: self.display_name(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Individual-resource backend.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    async fn get_resource(&self, key: &ResourceKey) -> Result<Value, TransportError>;

    async fn create_resource(&self, manifest: &Value) -> Result<Value, TransportError>;

    async fn update_resource(&self, manifest: &Value) -> Result<Value, TransportError>;

    async fn delete_resource(&self, key: &ResourceKey) -> Result<(), TransportError>;

    /// Lists resources of `gvk` whose labels contain every selector entry.
    async fn discover_resources(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOperation {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub operation: ApplyOperation,
    pub generation: i64,
}

/// Bundle delivery backend.
#[async_trait]
pub trait BundleTransport: Send + Sync {
    /// Applies a serialized bundle document to `target`, returning the delivered bundle.
    async fn apply_resource(&self, bundle: &[u8], options: &ApplyOptions, target: &str) -> Result<Value, TransportError>;

    async fn get_bundle(&self, target: &str, name: &str) -> Result<Value, TransportError>;

    async fn delete_bundle(&self, target: &str, name: &str) -> Result<(), TransportError>;

    async fn discover_bundles(&self, target: &str, selector: &LabelSelector) -> Result<Vec<Value>, TransportError>;
}

/// True when `document`'s labels contain every selector entry.
pub fn matches_selector(document: &Value, selector: &LabelSelector) -> bool {
    let labels = document.pointer("/metadata/labels");
    selector
        .iter()
        .all(|(key, expected)| labels.and_then(|labels| labels.get(key)).and_then(Value::as_str) == Some(expected.as_str()))
}
