use adapter_types::{DiscoverySpec, GENERATION_ANNOTATION, ResourceSpec};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{
    ReconciledDocuments, ResourceServices, decide_operation, guarded, log_decision, manifest_error, render_optional, render_selector,
    resolve_discovery, resource_error, select_latest, transport_error, wait_until_gone,
};
use crate::{
    error::{ErrorKind, ExecutorError},
    manifest::{render_manifest, validate_manifest},
    result::{ExecutionPhase, ResourceOperation, ResourceResult},
    transport::{ApplyOperation, ApplyOptions, BundleTransport, matches_selector},
};

pub const BUNDLE_API_VERSION: &str = "work.adapter.io/v1";
pub const BUNDLE_KIND: &str = "WorkBundle";

/// A rendered bundle ready to be applied.
struct DesiredBundle {
    target: String,
    name: String,
    generation: i64,
    document: Value,
}

pub(super) async fn reconcile(
    spec: &ResourceSpec,
    vars: &Map<String, Value>,
    services: ResourceServices<'_>,
    result: &mut ResourceResult,
) -> Result<ReconciledDocuments, ExecutorError> {
    let step = spec.name.as_str();
    let transport = services
        .bundle_transport
        .ok_or_else(|| resource_error(step, ErrorKind::Transport, "no bundle transport is configured"))?;

    let desired = render_bundle(spec, vars)?;
    result.kind = BUNDLE_KIND.to_string();
    result.namespace = Some(desired.target.clone());
    result.resource_name = desired.name.clone();

    let existing = discover(spec, &desired, vars, transport, services).await?;
    let (operation, reason) = decide_operation(desired.generation, existing.as_ref(), spec.recreate_on_change);
    log_decision(step, operation, &reason);
    result.operation = Some(operation);
    result.operation_reason = reason;

    let delivered = match (operation, existing) {
        (ResourceOperation::Skip, Some(existing)) => existing,
        (ResourceOperation::Update, Some(existing)) => {
            let mut document = desired.document.clone();
            if let Some(version) = existing.pointer("/metadata/resourceVersion").cloned()
                && let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut)
            {
                metadata.insert("resourceVersion".into(), version);
            }
            apply(step, &desired, &document, ApplyOperation::Update, transport, services).await?
        }
        (ResourceOperation::Recreate, Some(existing)) => {
            let name = existing.pointer("/metadata/name").and_then(Value::as_str).unwrap_or(desired.name.as_str()).to_string();
            delete(step, &desired.target, &name, transport, services).await?;
            apply(step, &desired, &desired.document, ApplyOperation::Create, transport, services).await?
        }
        _ => apply(step, &desired, &desired.document, ApplyOperation::Create, transport, services).await?,
    };

    let mut documents = Vec::with_capacity(spec.nested_discoveries.len() + 1);
    for nested in &spec.nested_discoveries {
        match find_nested(step, &delivered, &nested.discovery, vars)? {
            Some(found) => documents.push((nested.name.clone(), found)),
            None => debug!(resource = step, nested = %nested.name, "nested discovery found nothing"),
        }
    }
    documents.insert(0, (spec.name.clone(), delivered));
    Ok(documents)
}

fn render_bundle(spec: &ResourceSpec, vars: &Map<String, Value>) -> Result<DesiredBundle, ExecutorError> {
    let step = spec.name.as_str();
    let target = render_optional(step, spec.transport.target.as_deref(), vars)?
        .filter(|target| !target.trim().is_empty())
        .ok_or_else(|| resource_error(step, ErrorKind::Manifest, "bundle target rendered empty"))?;
    let name = render_optional(step, spec.transport.bundle_name.as_deref(), vars)?
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| spec.name.clone());

    let mut generation = 0;
    let mut manifests = Vec::with_capacity(spec.manifests.len());
    for named in &spec.manifests {
        let rendered = render_manifest(&named.manifest, vars).map_err(|error| manifest_error(step, error))?;
        let info = validate_manifest(&rendered)
            .map_err(|error| resource_error(step, ErrorKind::Manifest, format!("manifest '{}': {error}", named.name)))?;
        generation = generation.max(info.generation);
        manifests.push(rendered);
    }

    let labels = match &spec.discovery {
        Some(discovery) => render_selector(step, discovery, vars)?.unwrap_or_default(),
        None => Default::default(),
    };
    let document = json!({
        "apiVersion": BUNDLE_API_VERSION,
        "kind": BUNDLE_KIND,
        "metadata": {
            "name": name,
            "namespace": target,
            "labels": labels,
            "annotations": {GENERATION_ANNOTATION: generation.to_string()}
        },
        "spec": {"workload": {"manifests": manifests}}
    });
    Ok(DesiredBundle {
        target,
        name,
        generation,
        document,
    })
}

async fn discover(
    spec: &ResourceSpec,
    desired: &DesiredBundle,
    vars: &Map<String, Value>,
    transport: &dyn BundleTransport,
    services: ResourceServices<'_>,
) -> Result<Option<Value>, ExecutorError> {
    let step = spec.name.as_str();
    let policy = services.options.discovery_error_policy;
    if let Some(discovery) = &spec.discovery {
        if let Some(selector) = render_selector(step, discovery, vars)? {
            let lookup = guarded(services.scope, step, transport.discover_bundles(&desired.target, &selector)).await?;
            return resolve_discovery(step, lookup.map(select_latest), policy);
        }
        if let Some(name) = render_optional(step, discovery.by_name.as_deref(), vars)? {
            let lookup = guarded(services.scope, step, transport.get_bundle(&desired.target, &name)).await?;
            return resolve_discovery(step, lookup.map(Some), policy);
        }
    }
    let lookup = guarded(services.scope, step, transport.get_bundle(&desired.target, &desired.name)).await?;
    resolve_discovery(step, lookup.map(Some), policy)
}

async fn apply(
    step: &str,
    desired: &DesiredBundle,
    document: &Value,
    operation: ApplyOperation,
    transport: &dyn BundleTransport,
    services: ResourceServices<'_>,
) -> Result<Value, ExecutorError> {
    let payload =
        serde_json::to_vec(document).map_err(|error| ExecutorError::from_source(ExecutionPhase::Resources, step, ErrorKind::Manifest, error))?;
    let options = ApplyOptions {
        operation,
        generation: desired.generation,
    };
    info!(resource = step, target = %desired.target, bundle = %desired.name, ?operation, generation = desired.generation, "applying bundle");
    guarded(services.scope, step, transport.apply_resource(&payload, &options, &desired.target))
        .await?
        .map_err(|error| transport_error(step, error))
}

async fn delete(
    step: &str,
    target: &str,
    name: &str,
    transport: &dyn BundleTransport,
    services: ResourceServices<'_>,
) -> Result<(), ExecutorError> {
    match guarded(services.scope, step, transport.delete_bundle(target, name)).await? {
        Ok(()) => {}
        Err(error) if error.is_not_found() => return Ok(()),
        Err(error) => return Err(transport_error(step, error)),
    }
    wait_until_gone(step, services, || transport.get_bundle(target, name)).await
}

/// Searches the manifests carried by a delivered bundle.
fn find_nested(step: &str, bundle: &Value, discovery: &DiscoverySpec, vars: &Map<String, Value>) -> Result<Option<Value>, ExecutorError> {
    let manifests = bundle
        .pointer("/spec/workload/manifests")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let namespace = render_optional(step, discovery.namespace.as_deref(), vars)?;
    let in_namespace = |manifest: &Value| {
        namespace
            .as_deref()
            .is_none_or(|namespace| manifest.pointer("/metadata/namespace").and_then(Value::as_str) == Some(namespace))
    };

    if let Some(selector) = render_selector(step, discovery, vars)? {
        let candidates = manifests
            .iter()
            .filter(|manifest| in_namespace(manifest) && matches_selector(manifest, &selector))
            .cloned()
            .collect();
        return Ok(select_latest(candidates));
    }
    let Some(name) = render_optional(step, discovery.by_name.as_deref(), vars)? else {
        return Ok(None);
    };
    Ok(manifests
        .iter()
        .find(|manifest| in_namespace(manifest) && manifest.pointer("/metadata/name").and_then(Value::as_str) == Some(name.as_str()))
        .cloned())
}
