//! Declarative adapter specification.
//!
//! An adapter configuration describes, for one kind of inbound event, which
//! parameters to extract, which preconditions gate actuation, which resources to
//! reconcile, and how outcomes are reported afterwards. The structures mirror the
//! YAML authoring format (camelCase keys) and preserve authoring order so the
//! engine processes items exactly in the sequence they were written.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{BackoffStrategy, HttpMethod};

mod loader;
mod validation;

pub use loader::{ConfigError, load_adapter_config, parse_adapter_config};
pub use validation::{ValidationError, validate_adapter_config};

/// Top-level adapter document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: AdapterMetadata,
    #[serde(default)]
    pub spec: AdapterSpec,
}

/// Identifying metadata for the adapter.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterMetadata {
    /// Adapter name, used in logs and exposed as `adapter.name`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
}

/// Ordered processing instructions for a single event.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSpec {
    /// Parameters extracted before any other phase runs.
    #[serde(default)]
    pub params: Vec<ParameterSpec>,
    /// Gates evaluated in order; the first unmet gate skips resources.
    #[serde(default)]
    pub preconditions: Vec<PreconditionSpec>,
    /// Resources reconciled in order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Payload building and status reporting.
    #[serde(default)]
    pub post: Option<PostConfig>,
}

/// Declares a single parameter and where its value comes from.
///
/// Source locators:
/// - `event.<path>` reads from the event payload
/// - `env.<NAME>` reads an environment variable
/// - `secret.<namespace>.<name>.<key>` reads from the secret store
/// - `configmap.<namespace>.<name>.<key>` reads from the config map store
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "type")]
    pub r#type: Option<ParameterType>,
}

/// Target type a parameter value is coerced into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    #[serde(alias = "int64", alias = "integer")]
    Int,
    #[serde(alias = "float64", alias = "number")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
}

/// A gate evaluated before resources are actuated.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreconditionSpec {
    pub name: String,
    #[serde(default)]
    pub log: Option<LogAction>,
    #[serde(default)]
    pub api_call: Option<ApiCallSpec>,
    /// Values captured from the API response into params.
    #[serde(default)]
    pub capture: Vec<CaptureField>,
    /// Structured conditions; all must match. Mutually exclusive with `expression`.
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub expression: Option<String>,
}

/// Emits a rendered message through the logging pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogAction {
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

/// Outbound HTTP call shared by preconditions and post-actions.
///
/// `url`, header values, and `body` are templates rendered against the current params.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallSpec {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderSpec>,
    #[serde(default)]
    pub body: Option<String>,
    /// Per-attempt timeout such as `"10s"`.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Total attempts including the first one.
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_backoff: Option<BackoffStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSpec {
    pub name: String,
    pub value: String,
}

/// A value captured from an API response, by field path or expression.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureField {
    pub name: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
}

/// Structured condition `field <operator> value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "notEquals",
            ConditionOperator::In => "in",
            ConditionOperator::NotIn => "notIn",
            ConditionOperator::Contains => "contains",
            ConditionOperator::GreaterThan => "greaterThan",
            ConditionOperator::LessThan => "lessThan",
            ConditionOperator::Exists => "exists",
        }
    }
}

/// A resource to reconcile.
///
/// Single-cluster resources use `manifest`; bundle resources package every entry in
/// `manifests` into one work unit delivered to `transport.target`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default)]
    pub transport: TransportSpec,
    #[serde(default)]
    pub manifest: Option<Value>,
    #[serde(default)]
    pub manifests: Vec<NamedManifest>,
    #[serde(default)]
    pub discovery: Option<DiscoverySpec>,
    /// Turns would-be updates into delete-then-create.
    #[serde(default)]
    pub recreate_on_change: bool,
    /// Lookups performed inside a delivered bundle after it is applied.
    #[serde(default)]
    pub nested_discoveries: Vec<NestedDiscovery>,
}

impl ResourceSpec {
    pub fn is_bundle(&self) -> bool {
        self.transport.client == TransportKind::Bundle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportSpec {
    #[serde(default)]
    pub client: TransportKind,
    /// Template-rendered target identifier for bundle delivery.
    #[serde(default)]
    pub target: Option<String>,
    /// Template-rendered bundle name; defaults to the resource name.
    #[serde(default)]
    pub bundle_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    #[serde(alias = "kubernetes")]
    Cluster,
    #[serde(alias = "maestro")]
    Bundle,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedManifest {
    pub name: String,
    pub manifest: Value,
}

/// Locates an existing counterpart by name or label selector.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySpec {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub by_name: Option<String>,
    #[serde(default)]
    pub by_selectors: Option<SelectorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    #[serde(default)]
    pub label_selector: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NestedDiscovery {
    pub name: String,
    pub discovery: DiscoverySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostConfig {
    #[serde(default)]
    pub payloads: Vec<PayloadSpec>,
    #[serde(default)]
    pub post_actions: Vec<PostActionSpec>,
}

/// Named payload built before post-actions run.
///
/// `build` leaves are literals, `{ field, default }` extractions, or
/// `{ expression, default }` evaluations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSpec {
    pub name: String,
    pub build: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostActionSpec {
    pub name: String,
    #[serde(default)]
    pub log: Option<LogAction>,
    #[serde(default)]
    pub api_call: Option<ApiCallSpec>,
}
