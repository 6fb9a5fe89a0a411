//! # Resource Reconciliation
//!
//! Resources are reconciled in declaration order. For each one the manifest
//! is rendered, the existing resource is discovered, and the desired
//! generation is compared with the existing one:
//!
//! | existing                        | operation                                  |
//! |---------------------------------|--------------------------------------------|
//! | not found                       | create                                     |
//! | lower generation                | update (recreate when `recreateOnChange`)  |
//! | equal or higher generation      | skip                                       |
//!
//! A recreate deletes the existing resource, polls until it is gone, and then
//! creates it again. The first failing resource stops the phase.
//!
//! Cluster resources live in [`cluster`]; bundle resources in [`bundle`].

mod bundle;
mod cluster;

use std::future::Future;

use adapter_types::{DiscoverySpec, ResourceSpec};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    context::ExecutionContext,
    error::{ErrorKind, ExecutorError},
    manifest::{ManifestError, existing_generation},
    options::{DiscoveryErrorPolicy, EngineOptions},
    result::{ExecutionPhase, ExecutionStatus, ResourceOperation, ResourceResult},
    scope::ExecutionScope,
    template,
    transport::{BundleTransport, LabelSelector, ResourceTransport, TransportError},
};

/// Backends and settings the resource phase runs with.
#[derive(Clone, Copy)]
pub struct ResourceServices<'a> {
    pub transport: Option<&'a dyn ResourceTransport>,
    pub bundle_transport: Option<&'a dyn BundleTransport>,
    pub scope: &'a ExecutionScope,
    pub options: &'a EngineOptions,
}

#[derive(Debug, Default)]
pub struct ResourcesOutcome {
    pub results: Vec<ResourceResult>,
    pub error: Option<ExecutorError>,
}

pub async fn reconcile_resources(
    specs: &[ResourceSpec],
    context: &mut ExecutionContext,
    services: ResourceServices<'_>,
) -> ResourcesOutcome {
    let mut outcome = ResourcesOutcome::default();
    for spec in specs {
        let vars = context.evaluation_vars();
        let mut result = ResourceResult {
            name: spec.name.clone(),
            kind: String::new(),
            namespace: None,
            resource_name: String::new(),
            status: ExecutionStatus::Success,
            operation: None,
            operation_reason: String::new(),
            error: None,
        };

        let reconciled = if spec.is_bundle() {
            bundle::reconcile(spec, &vars, services, &mut result).await
        } else {
            cluster::reconcile(spec, &vars, services, &mut result).await
        };

        match reconciled.and_then(|documents| store_documents(context, spec, documents)) {
            Ok(()) => outcome.results.push(result),
            Err(error) => {
                warn!(resource = %spec.name, error = %error, "resource reconciliation failed");
                result.status = ExecutionStatus::Failed;
                result.error = Some(error.message.clone());
                outcome.results.push(result);
                outcome.error = Some(error);
                break;
            }
        }
    }
    outcome
}

/// Documents produced by reconciling one resource, keyed by the name they are stored under.
pub(crate) type ReconciledDocuments = Vec<(String, Value)>;

fn store_documents(context: &mut ExecutionContext, spec: &ResourceSpec, documents: ReconciledDocuments) -> Result<(), ExecutorError> {
    for (name, document) in documents {
        if !context.record_resource(&name, document) {
            return Err(resource_error(&spec.name, ErrorKind::Manifest, format!("resource '{name}' was already recorded in this execution")));
        }
    }
    Ok(())
}

/// Chooses the operation for a desired generation given the existing document.
pub fn decide_operation(desired_generation: i64, existing: Option<&Value>, recreate_on_change: bool) -> (ResourceOperation, String) {
    let Some(existing) = existing else {
        return (ResourceOperation::Create, "resource not found".to_string());
    };
    let current = existing_generation(existing);
    if current < desired_generation {
        let reason = format!("generation changed {current} -> {desired_generation}");
        if recreate_on_change {
            return (ResourceOperation::Recreate, format!("{reason}; recreate on change"));
        }
        return (ResourceOperation::Update, reason);
    }
    if current == desired_generation {
        return (ResourceOperation::Skip, format!("generation {current} unchanged"));
    }
    (ResourceOperation::Skip, format!("existing generation {current} is newer than desired {desired_generation}"))
}

/// Picks the candidate with the highest generation; ties go to the lexicographically smallest name.
pub fn select_latest(candidates: Vec<Value>) -> Option<Value> {
    let name = |document: &Value| document.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default().to_string();
    candidates.into_iter().min_by(|a, b| {
        existing_generation(b)
            .cmp(&existing_generation(a))
            .then_with(|| name(a).cmp(&name(b)))
    })
}

pub(crate) fn resource_error(step: &str, kind: ErrorKind, message: impl Into<String>) -> ExecutorError {
    ExecutorError::new(ExecutionPhase::Resources, step, kind, message)
}

pub(crate) fn manifest_error(step: &str, error: ManifestError) -> ExecutorError {
    let kind = match error {
        ManifestError::Template(_) => ErrorKind::Template,
        _ => ErrorKind::Manifest,
    };
    ExecutorError::from_source(ExecutionPhase::Resources, step, kind, error)
}

pub(crate) fn transport_error(step: &str, error: TransportError) -> ExecutorError {
    ExecutorError::from_source(ExecutionPhase::Resources, step, ErrorKind::Transport, error)
}

/// Runs a transport call inside the scope; interruption becomes an executor error, transport errors are returned as-is.
pub(crate) async fn guarded<T, F>(scope: &ExecutionScope, step: &str, future: F) -> Result<Result<T, TransportError>, ExecutorError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    scope
        .run(future)
        .await
        .map_err(|interrupted| ExecutorError::from_source(ExecutionPhase::Resources, step, ErrorKind::Cancelled, interrupted))
}

/// Maps a discovery lookup to "existing or absent", applying the discovery error policy.
pub(crate) fn resolve_discovery(
    step: &str,
    lookup: Result<Option<Value>, TransportError>,
    policy: DiscoveryErrorPolicy,
) -> Result<Option<Value>, ExecutorError> {
    match lookup {
        Ok(found) => Ok(found),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => match policy {
            DiscoveryErrorPolicy::Fail => Err(transport_error(step, error)),
            DiscoveryErrorPolicy::ProceedAsMissing => {
                warn!(resource = step, error = %error, "discovery failed; treating resource as missing");
                Ok(None)
            }
        },
    }
}

/// Polls `check` until it reports not-found, bounded by the recreate timeout and the scope.
pub(crate) async fn wait_until_gone<F, Fut>(step: &str, services: ResourceServices<'_>, mut check: F) -> Result<(), ExecutorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, TransportError>>,
{
    let started = Instant::now();
    loop {
        match guarded(services.scope, step, check()).await? {
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(transport_error(step, error)),
            Ok(_) if started.elapsed() >= services.options.recreate_timeout => {
                return Err(resource_error(
                    step,
                    ErrorKind::Transport,
                    format!("timed out after {:?} waiting for deletion to complete", services.options.recreate_timeout),
                ));
            }
            Ok(_) => {
                services
                    .scope
                    .sleep(services.options.recreate_poll_interval)
                    .await
                    .map_err(|interrupted| ExecutorError::from_source(ExecutionPhase::Resources, step, ErrorKind::Cancelled, interrupted))?;
            }
        }
    }
}

/// Renders the label selector of a discovery spec.
pub(crate) fn render_selector(
    step: &str,
    discovery: &DiscoverySpec,
    vars: &Map<String, Value>,
) -> Result<Option<LabelSelector>, ExecutorError> {
    let Some(selectors) = &discovery.by_selectors else {
        return Ok(None);
    };
    let mut selector = IndexMap::with_capacity(selectors.label_selector.len());
    for (key, value) in &selectors.label_selector {
        let key = template::render(key, vars).map_err(|error| manifest_error(step, error.into()))?;
        let value = template::render(value, vars).map_err(|error| manifest_error(step, error.into()))?;
        selector.insert(key, value);
    }
    Ok(Some(selector))
}

pub(crate) fn render_optional(step: &str, text: Option<&str>, vars: &Map<String, Value>) -> Result<Option<String>, ExecutorError> {
    text.map(|text| template::render(text, vars).map_err(|error| manifest_error(step, error.into())))
        .transpose()
}

pub(crate) fn log_decision(step: &str, operation: ResourceOperation, reason: &str) {
    info!(resource = step, operation = %operation, reason, "resource operation decided");
}
