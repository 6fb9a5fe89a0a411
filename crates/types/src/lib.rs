//! # Adapter Types
//!
//! Strongly typed adapter configuration shared by the execution engine and the CLI.
//!
//! - **`config`**: serde model for adapter specifications (params, preconditions,
//!   resources, post-processing), plus the YAML loader and validation check list
//! - **`duration`**: human-friendly duration parsing (`"500ms"`, `"10s"`, `"2m"`)
//! - **`http`**: HTTP method and retry backoff vocabulary shared with the HTTP client

pub mod config;
pub mod duration;
pub mod http;

pub use config::{
    AdapterConfig, AdapterMetadata, AdapterSpec, ApiCallSpec, CaptureField, ConditionOperator, ConditionSpec, ConfigError, DiscoverySpec,
    HeaderSpec, LogAction, LogLevel, NamedManifest, NestedDiscovery, ParameterSpec, ParameterType, PayloadSpec, PostActionSpec, PostConfig,
    PreconditionSpec, ResourceSpec, SelectorSpec, TransportKind, TransportSpec, ValidationError, load_adapter_config, parse_adapter_config,
    validate_adapter_config,
};
pub use duration::parse_duration;
pub use http::{BackoffStrategy, HttpMethod};

/// Annotation key carrying the desired generation of a manifest.
pub const GENERATION_ANNOTATION: &str = "adapter.io/generation";
