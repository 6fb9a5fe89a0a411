//! # Adapter Engine
//!
//! The adapter engine turns one inbound event into reconciled resources and a
//! status report, driven entirely by a declarative [`AdapterConfig`](adapter_types::AdapterConfig).
//!
//! ## Phases
//!
//! - **Parameter extraction**: values from the event, environment, secrets, and config maps
//! - **Preconditions**: API calls, captures, and conditions or expressions gating actuation
//! - **Resources**: generation-aware create / update / recreate / skip through a transport
//! - **Post-actions**: payload building and status reporting calls
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use adapter_engine::{ExecutionScope, Executor, MemoryTransport};
//! use adapter_types::load_adapter_config;
//! use adapter_util::ReqwestHttpClient;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Executor::builder()
//!     .config(load_adapter_config("adapter.yaml")?)
//!     .http_client(Arc::new(ReqwestHttpClient::new()?))
//!     .transport(Arc::new(MemoryTransport::new()))
//!     .build()?;
//!
//! let result = executor.execute(&ExecutionScope::new(), br#"{"id": "c1"}"#).await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`executor`**: the phase orchestrator and its builder
//! - **`params`**, **`preconditions`**, **`resources`**, **`post_actions`**: one module per phase
//! - **`template`** and **`criteria`**: template rendering, conditions, and expressions
//! - **`transport`** and **`value_store`**: backend seams with in-memory implementations
//! - **`context`**, **`result`**, **`error`**: per-event state and reporting

pub mod api_call;
pub mod context;
pub mod criteria;
pub mod error;
pub mod event;
pub mod executor;
pub mod field_paths;
pub mod manifest;
pub mod options;
pub mod params;
pub mod payload;
pub mod post_actions;
pub mod preconditions;
pub mod resources;
pub mod result;
pub mod scope;
pub mod template;
pub mod transport;
pub mod value_store;

#[cfg(test)]
mod test_support;

pub use context::{AdapterState, EvaluationRecord, ExecutionContext, FieldEvaluation};
pub use criteria::{CriteriaError, Evaluator};
pub use error::{ErrorKind, ExecutionErrorInfo, ExecutorError};
pub use event::{Event, EventError, parse_event};
pub use executor::{BuilderError, Executor, ExecutorBuilder};
pub use options::{DiscoveryErrorPolicy, EngineOptions};
pub use result::{ExecutionPhase, ExecutionResult, ExecutionStatus, PostActionResult, PreconditionResult, ResourceOperation, ResourceResult};
pub use scope::{Correlation, ExecutionScope, Interrupted};
pub use transport::{
    ApplyOperation, ApplyOptions, BundleTransport, GroupVersionKind, LabelSelector, MemoryBundleTransport, MemoryTransport, ResourceKey,
    ResourceTransport, TransportError,
};
pub use value_store::{StaticValueStore, ValueStore, ValueStoreError};
