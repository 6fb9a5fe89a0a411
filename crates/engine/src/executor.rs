//! # Executor
//!
//! Runs one event through the four phases in fixed order:
//!
//! 1. parameter extraction
//! 2. preconditions
//! 3. resources
//! 4. post-actions
//!
//! Phases always move forward. A failed parameter extraction or precondition
//! skips resources, an unmet precondition skips resources without failing the
//! execution, and post-actions run in every case except an unparseable event.
//! [`Executor::execute`] never panics and always returns an [`ExecutionResult`].

use std::sync::Arc;

use adapter_types::{AdapterConfig, ValidationError, validate_adapter_config};
use adapter_util::HttpClient;
use thiserror::Error;
use tracing::{Span, field, info, instrument, warn};

use crate::{
    context::ExecutionContext,
    error::{ErrorKind, ExecutorError},
    event::parse_event,
    options::EngineOptions,
    params::{ParameterSource, extract_params},
    post_actions::execute_post_actions,
    preconditions::evaluate_preconditions,
    resources::{ResourceServices, reconcile_resources},
    result::{ExecutionPhase, ExecutionResult, ExecutionStatus},
    scope::ExecutionScope,
    transport::{BundleTransport, ResourceTransport},
    value_store::ValueStore,
};

/// Reasons [`ExecutorBuilder::build`] refuses to produce an executor.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("an adapter config is required")]
    MissingConfig,

    #[error("'{step}' makes API calls but no HTTP client was provided")]
    MissingHttpClient { step: String },

    #[error("resource '{resource}' uses the cluster transport but none was provided")]
    MissingTransport { resource: String },

    #[error("resource '{resource}' uses the bundle transport but none was provided")]
    MissingBundleTransport { resource: String },

    #[error("parameter '{param}' reads from a secret or config map but no value store was provided")]
    MissingValueStore { param: String },

    #[error(transparent)]
    InvalidConfig(#[from] ValidationError),
}

#[derive(Default)]
pub struct ExecutorBuilder {
    config: Option<AdapterConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    transport: Option<Arc<dyn ResourceTransport>>,
    bundle_transport: Option<Arc<dyn BundleTransport>>,
    value_store: Option<Arc<dyn ValueStore>>,
    options: EngineOptions,
}

impl ExecutorBuilder {
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ResourceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn bundle_transport(mut self, transport: Arc<dyn BundleTransport>) -> Self {
        self.bundle_transport = Some(transport);
        self
    }

    pub fn value_store(mut self, store: Arc<dyn ValueStore>) -> Self {
        self.value_store = Some(store);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the config and checks that every collaborator it needs was provided.
    pub fn build(self) -> Result<Executor, BuilderError> {
        let config = self.config.ok_or(BuilderError::MissingConfig)?;
        validate_adapter_config(&config)?;
        let spec = &config.spec;

        if self.http_client.is_none() {
            let precondition_calls = spec.preconditions.iter().filter(|p| p.api_call.is_some()).map(|p| &p.name);
            let post_calls = spec
                .post
                .iter()
                .flat_map(|post| post.post_actions.iter())
                .filter(|action| action.api_call.is_some())
                .map(|action| &action.name);
            if let Some(step) = precondition_calls.chain(post_calls).next() {
                return Err(BuilderError::MissingHttpClient { step: step.clone() });
            }
        }
        for resource in &spec.resources {
            if resource.is_bundle() && self.bundle_transport.is_none() {
                return Err(BuilderError::MissingBundleTransport {
                    resource: resource.name.clone(),
                });
            }
            if !resource.is_bundle() && self.transport.is_none() {
                return Err(BuilderError::MissingTransport {
                    resource: resource.name.clone(),
                });
            }
        }
        if self.value_store.is_none()
            && let Some(param) = spec.params.iter().find(|param| {
                matches!(
                    ParameterSource::parse(&param.source),
                    Some(ParameterSource::Secret(_) | ParameterSource::ConfigMap(_))
                )
            })
        {
            return Err(BuilderError::MissingValueStore { param: param.name.clone() });
        }

        Ok(Executor {
            config: Arc::new(config),
            http_client: self.http_client,
            transport: self.transport,
            bundle_transport: self.bundle_transport,
            value_store: self.value_store,
            options: self.options,
        })
    }
}

/// Stateless event executor; cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Executor {
    config: Arc<AdapterConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    transport: Option<Arc<dyn ResourceTransport>>,
    bundle_transport: Option<Arc<dyn BundleTransport>>,
    value_store: Option<Arc<dyn ValueStore>>,
    options: EngineOptions,
}

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[instrument(name = "execute", skip_all, fields(adapter = %self.config.metadata.name, event_id = field::Empty))]
    pub async fn execute(&self, scope: &ExecutionScope, raw_event: &[u8]) -> ExecutionResult {
        let mut result = ExecutionResult::new();
        let event = match parse_event(raw_event) {
            Ok(event) => event,
            Err(error) => {
                let error = ExecutorError::from_source(ExecutionPhase::ParamExtraction, "event", ErrorKind::Parse, error);
                warn!(error = %error, "event could not be parsed; aborting");
                result.status = ExecutionStatus::Failed;
                result.errors.insert(error.phase, error.info());
                return result;
            }
        };

        let mut correlation = scope.correlation().clone();
        if correlation.event_id.is_none() {
            correlation.event_id = event.id.clone();
        }
        if let Some(event_id) = &correlation.event_id {
            Span::current().record("event_id", event_id.as_str());
        }
        result.event_id = correlation.event_id.clone();
        let mut context = ExecutionContext::new(self.config.metadata.name.clone(), event.data, correlation);
        let spec = &self.config.spec;
        let http = self.http_client.as_deref();

        match extract_params(&spec.params, &context.event, self.value_store.as_deref()).await {
            Ok(params) => context.params = params,
            Err(error) => {
                record_error(&mut context, &mut result, error);
                context.skip_resources("parameter extraction failed");
            }
        }

        if context.adapter.execution_status == ExecutionStatus::Success {
            result.phase = ExecutionPhase::Preconditions;
            let outcome = evaluate_preconditions(&spec.preconditions, &mut context, http, scope, &self.options).await;
            result.precondition_results = outcome.results;
            if let Some(error) = outcome.error {
                let reason = format!("precondition '{}' failed", error.step);
                record_error(&mut context, &mut result, error);
                context.skip_resources(reason);
            } else if let Some(reason) = outcome.not_met_reason {
                context.skip_resources(reason);
            } else {
                result.phase = ExecutionPhase::Resources;
                let services = ResourceServices {
                    transport: self.transport.as_deref(),
                    bundle_transport: self.bundle_transport.as_deref(),
                    scope,
                    options: &self.options,
                };
                let outcome = reconcile_resources(&spec.resources, &mut context, services).await;
                result.resource_results = outcome.results;
                if let Some(error) = outcome.error {
                    record_error(&mut context, &mut result, error);
                }
            }
        }

        if let Some(post) = &spec.post {
            result.phase = ExecutionPhase::PostActions;
            let outcome = execute_post_actions(post, &mut context, http, scope, &self.options).await;
            result.post_action_results = outcome.results;
            if let Some(error) = outcome.error {
                record_error(&mut context, &mut result, error);
            }
        }

        if let Some(failed_phase) = result.errors.keys().next() {
            result.phase = *failed_phase;
        }
        result.status = context.adapter.execution_status;
        result.resources_skipped = context.adapter.resources_skipped;
        result.skip_reason = context.adapter.skip_reason.clone();
        result.params = context.params;
        info!(
            status = %result.status,
            phase = %result.phase,
            resources_skipped = result.resources_skipped,
            "event processed"
        );
        result
    }
}

fn record_error(context: &mut ExecutionContext, result: &mut ExecutionResult, error: ExecutorError) {
    warn!(phase = %error.phase, step = %error.step, error = %error, "phase failed");
    context.record_failure(&error);
    result.errors.insert(error.phase, error.info());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::FakeHttpClient,
        transport::{MemoryBundleTransport, MemoryTransport},
        value_store::StaticValueStore,
    };

    fn config(yaml: &str) -> AdapterConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const WITH_API_CALL: &str = r#"
metadata:
  name: status-reporter
spec:
  params:
    - name: clusterId
      source: event.id
      required: true
  preconditions:
    - name: clusterStatus
      apiCall:
        url: "https://api.example.com/clusters/{{ .clusterId }}"
"#;

    #[test]
    fn executor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Executor>();
    }

    #[test]
    fn build_requires_a_config() {
        assert!(matches!(Executor::builder().build(), Err(BuilderError::MissingConfig)));
    }

    #[test]
    fn build_requires_an_http_client_for_api_calls() {
        let error = Executor::builder().config(config(WITH_API_CALL)).build().err().unwrap();
        assert!(matches!(error, BuilderError::MissingHttpClient { ref step } if step == "clusterStatus"));

        let built = Executor::builder()
            .config(config(WITH_API_CALL))
            .http_client(Arc::new(FakeHttpClient::new()))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn build_requires_transports_for_resources() {
        let yaml = r#"
metadata:
  name: bundler
spec:
  resources:
    - name: workload
      transport:
        client: bundle
        target: edge-1
      manifests:
        - name: ns
          manifest:
            apiVersion: v1
            kind: Namespace
            metadata:
              name: ns
              annotations:
                adapter.io/generation: "1"
"#;
        let error = Executor::builder()
            .config(config(yaml))
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(error, BuilderError::MissingBundleTransport { ref resource } if resource == "workload"));

        let built = Executor::builder()
            .config(config(yaml))
            .bundle_transport(Arc::new(MemoryBundleTransport::new()))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn build_requires_a_value_store_for_secret_params() {
        let yaml = r#"
metadata:
  name: secretive
spec:
  params:
    - name: token
      source: secret.platform.api.token
"#;
        let error = Executor::builder().config(config(yaml)).build().err().unwrap();
        assert!(matches!(error, BuilderError::MissingValueStore { ref param } if param == "token"));

        let built = Executor::builder()
            .config(config(yaml))
            .value_store(Arc::new(StaticValueStore::new()))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn build_rejects_invalid_configs() {
        let yaml = r#"
metadata:
  name: broken
spec:
  params:
    - name: clusterId
      source: nowhere.id
"#;
        let error = Executor::builder().config(config(yaml)).build().err().unwrap();
        assert!(matches!(error, BuilderError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn unparseable_events_abort_before_any_phase() {
        let http = Arc::new(FakeHttpClient::new());
        let executor = Executor::builder().config(config(WITH_API_CALL)).http_client(http.clone()).build().unwrap();
        let result = executor.execute(&ExecutionScope::new(), b"{not json").await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.phase, ExecutionPhase::ParamExtraction);
        assert_eq!(result.error_for(ExecutionPhase::ParamExtraction).unwrap().kind, ErrorKind::Parse);
        assert!(result.precondition_results.is_empty());
        assert!(http.requests().is_empty());
    }
}
