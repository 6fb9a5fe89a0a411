use adapter_types::ResourceSpec;
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    ReconciledDocuments, ResourceServices, decide_operation, guarded, log_decision, manifest_error, render_optional, render_selector,
    resolve_discovery, resource_error, select_latest, transport_error, wait_until_gone,
};
use crate::{
    error::{ErrorKind, ExecutorError},
    manifest::{ManifestInfo, render_manifest, validate_manifest},
    result::{ResourceOperation, ResourceResult},
    transport::{ResourceKey, ResourceTransport},
};

pub(super) async fn reconcile(
    spec: &ResourceSpec,
    vars: &Map<String, Value>,
    services: ResourceServices<'_>,
    result: &mut ResourceResult,
) -> Result<ReconciledDocuments, ExecutorError> {
    let step = spec.name.as_str();
    let transport = services
        .transport
        .ok_or_else(|| resource_error(step, ErrorKind::Transport, "no resource transport is configured"))?;
    let template = spec
        .manifest
        .as_ref()
        .ok_or_else(|| resource_error(step, ErrorKind::Manifest, "resource has no manifest"))?;

    let desired = render_manifest(template, vars).map_err(|error| manifest_error(step, error))?;
    let info = validate_manifest(&desired).map_err(|error| manifest_error(step, error))?;
    result.kind = info.gvk().kind.clone();
    result.namespace = info.key.namespace.clone();
    result.resource_name = info.key.name.clone();

    let existing = discover(spec, &info, vars, transport, services).await?;
    let (operation, reason) = decide_operation(info.generation, existing.as_ref(), spec.recreate_on_change);
    log_decision(step, operation, &reason);
    result.operation = Some(operation);
    result.operation_reason = reason;

    let document = match (operation, existing) {
        (ResourceOperation::Skip, Some(existing)) => existing,
        (ResourceOperation::Update, Some(existing)) => {
            let desired = carry_server_fields(desired, &existing);
            guarded(services.scope, step, transport.update_resource(&desired))
                .await?
                .map_err(|error| transport_error(step, error))?
        }
        (ResourceOperation::Recreate, Some(existing)) => {
            let key = ResourceKey::of(&existing).unwrap_or_else(|| info.key.clone());
            delete(step, &key, transport, services).await?;
            guarded(services.scope, step, transport.create_resource(&desired))
                .await?
                .map_err(|error| transport_error(step, error))?
        }
        _ => guarded(services.scope, step, transport.create_resource(&desired))
            .await?
            .map_err(|error| transport_error(step, error))?,
    };
    Ok(vec![(spec.name.clone(), document)])
}

async fn discover(
    spec: &ResourceSpec,
    info: &ManifestInfo,
    vars: &Map<String, Value>,
    transport: &dyn ResourceTransport,
    services: ResourceServices<'_>,
) -> Result<Option<Value>, ExecutorError> {
    let step = spec.name.as_str();
    let Some(discovery) = &spec.discovery else {
        let lookup = guarded(services.scope, step, transport.get_resource(&info.key)).await?;
        return resolve_discovery(step, lookup.map(Some), services.options.discovery_error_policy);
    };

    let namespace = render_optional(step, discovery.namespace.as_deref(), vars)?
        .filter(|namespace| !namespace.is_empty())
        .or_else(|| info.key.namespace.clone());

    if let Some(selector) = render_selector(step, discovery, vars)? {
        debug!(resource = step, ?selector, "discovering by label selector");
        let lookup = guarded(services.scope, step, transport.discover_resources(info.gvk(), namespace.as_deref(), &selector)).await?;
        return resolve_discovery(step, lookup.map(select_latest), services.options.discovery_error_policy);
    }

    let name = render_optional(step, discovery.by_name.as_deref(), vars)?.unwrap_or_else(|| info.key.name.clone());
    let key = ResourceKey {
        gvk: info.gvk().clone(),
        namespace,
        name,
    };
    let lookup = guarded(services.scope, step, transport.get_resource(&key)).await?;
    resolve_discovery(step, lookup.map(Some), services.options.discovery_error_policy)
}

async fn delete(
    step: &str,
    key: &ResourceKey,
    transport: &dyn ResourceTransport,
    services: ResourceServices<'_>,
) -> Result<(), ExecutorError> {
    match guarded(services.scope, step, transport.delete_resource(key)).await? {
        Ok(()) => {}
        Err(error) if error.is_not_found() => return Ok(()),
        Err(error) => return Err(transport_error(step, error)),
    }
    debug!(resource = step, name = %key.display_name(), "waiting for deletion");
    wait_until_gone(step, services, || transport.get_resource(key)).await
}

/// Copies the server-owned identity fields of `existing` onto the desired document.
fn carry_server_fields(mut desired: Value, existing: &Value) -> Value {
    if let Some(metadata) = desired.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in ["resourceVersion", "uid"] {
            if let Some(value) = existing.pointer(&format!("/metadata/{field}")) {
                metadata.insert(field.to_string(), value.clone());
            }
        }
    }
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::{DiscoveryErrorPolicy, EngineOptions},
        result::ExecutionStatus,
        scope::ExecutionScope,
        transport::{MemoryTransport, TransportError, memory::TransportOperation},
    };
    use adapter_types::{DiscoverySpec, GENERATION_ANNOTATION, SelectorSpec};
    use serde_json::json;
    use std::time::Duration;

    fn config_map(name: &str, generation: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": "ns-c1",
                "labels": {"cluster": "c1"},
                "annotations": {GENERATION_ANNOTATION: generation}
            },
            "data": {"region": "us-east"}
        })
    }

    fn spec(manifest: Value) -> ResourceSpec {
        ResourceSpec {
            name: "settings".into(),
            manifest: Some(manifest),
            ..ResourceSpec::default()
        }
    }

    fn empty_result() -> ResourceResult {
        ResourceResult {
            name: "settings".into(),
            kind: String::new(),
            namespace: None,
            resource_name: String::new(),
            status: ExecutionStatus::Success,
            operation: None,
            operation_reason: String::new(),
            error: None,
        }
    }

    async fn run(
        spec: &ResourceSpec,
        transport: &MemoryTransport,
        options: &EngineOptions,
    ) -> (Result<ReconciledDocuments, ExecutorError>, ResourceResult) {
        let scope = ExecutionScope::new();
        let services = ResourceServices {
            transport: Some(transport),
            bundle_transport: None,
            scope: &scope,
            options,
        };
        let mut result = empty_result();
        let outcome = reconcile(spec, &Map::new(), services, &mut result).await;
        (outcome, result)
    }

    #[tokio::test]
    async fn creates_missing_resources() {
        let transport = MemoryTransport::new();
        let (outcome, result) = run(&spec(config_map("cfg", "1")), &transport, &EngineOptions::default()).await;
        let documents = outcome.unwrap();
        assert_eq!(result.operation, Some(ResourceOperation::Create));
        assert_eq!(result.kind, "ConfigMap");
        assert_eq!(result.namespace.as_deref(), Some("ns-c1"));
        assert_eq!(documents[0].0, "settings");
        assert!(documents[0].1["metadata"]["uid"].is_string());
    }

    #[tokio::test]
    async fn updates_carry_resource_version() {
        let transport = MemoryTransport::new();
        let (first, _) = run(&spec(config_map("cfg", "1")), &transport, &EngineOptions::default()).await;
        let created = first.unwrap().remove(0).1;

        let (outcome, result) = run(&spec(config_map("cfg", "2")), &transport, &EngineOptions::default()).await;
        let updated = outcome.unwrap().remove(0).1;
        assert_eq!(result.operation, Some(ResourceOperation::Update));
        assert_eq!(updated["metadata"]["uid"], created["metadata"]["uid"]);
        assert_eq!(updated["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn equal_generation_keeps_the_existing_document() {
        let mut existing = config_map("cfg", "3");
        existing["data"]["region"] = json!("eu-west");
        let transport = MemoryTransport::with_objects([existing]);
        let (outcome, result) = run(&spec(config_map("cfg", "3")), &transport, &EngineOptions::default()).await;
        assert_eq!(result.operation, Some(ResourceOperation::Skip));
        assert_eq!(outcome.unwrap()[0].1["data"]["region"], "eu-west");
        let writes = transport
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call.operation, TransportOperation::Create | TransportOperation::Update))
            .count();
        assert_eq!(writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_waits_for_the_old_resource_to_disappear() {
        let transport = MemoryTransport::with_objects([config_map("cfg", "1")]).with_deletion_delay(3);
        let mut resource = spec(config_map("cfg", "2"));
        resource.recreate_on_change = true;
        let (outcome, result) = run(&resource, &transport, &EngineOptions::default()).await;
        assert_eq!(result.operation, Some(ResourceOperation::Recreate));
        assert_eq!(outcome.unwrap()[0].1["metadata"]["annotations"][GENERATION_ANNOTATION], "2");
        let operations: Vec<_> = transport.calls().await.into_iter().map(|call| call.operation).collect();
        let delete = operations.iter().position(|op| *op == TransportOperation::Delete).unwrap();
        let create = operations.iter().position(|op| *op == TransportOperation::Create).unwrap();
        assert!(delete < create);
        assert!(operations[delete..create].iter().filter(|op| **op == TransportOperation::Get).count() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_gives_up_after_the_timeout() {
        let transport = MemoryTransport::with_objects([config_map("cfg", "1")]).with_deletion_delay(u32::MAX);
        let mut resource = spec(config_map("cfg", "2"));
        resource.recreate_on_change = true;
        let options = EngineOptions {
            recreate_timeout: Duration::from_secs(1),
            ..EngineOptions::default()
        };
        let (outcome, _) = run(&resource, &transport, &options).await;
        let error = outcome.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Transport);
        assert!(error.message.contains("waiting for deletion"));
    }

    #[tokio::test]
    async fn selector_discovery_picks_the_latest_generation() {
        let transport = MemoryTransport::with_objects([config_map("cfg-a", "2"), config_map("cfg-b", "5")]);
        let mut resource = spec(config_map("cfg-new", "4"));
        resource.discovery = Some(DiscoverySpec {
            by_selectors: Some(SelectorSpec {
                label_selector: [("cluster".to_string(), "c1".to_string())].into_iter().collect(),
            }),
            ..DiscoverySpec::default()
        });
        let (outcome, result) = run(&resource, &transport, &EngineOptions::default()).await;
        assert_eq!(result.operation, Some(ResourceOperation::Skip));
        assert_eq!(outcome.unwrap()[0].1["metadata"]["name"], "cfg-b");
    }

    #[tokio::test]
    async fn discovery_failures_follow_the_policy() {
        let transport = MemoryTransport::new();
        transport.fail_on(TransportOperation::Get, TransportError::Unavailable("api down".into())).await;

        let (outcome, _) = run(&spec(config_map("cfg", "1")), &transport, &EngineOptions::default()).await;
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Transport);

        let lenient = EngineOptions {
            discovery_error_policy: DiscoveryErrorPolicy::ProceedAsMissing,
            ..EngineOptions::default()
        };
        let (outcome, result) = run(&spec(config_map("cfg", "1")), &transport, &lenient).await;
        assert!(outcome.is_ok());
        assert_eq!(result.operation, Some(ResourceOperation::Create));
    }

    #[tokio::test]
    async fn invalid_manifests_never_reach_the_transport() {
        let transport = MemoryTransport::new();
        let mut manifest = config_map("cfg", "1");
        manifest["metadata"]["annotations"] = json!({});
        let (outcome, _) = run(&spec(manifest), &transport, &EngineOptions::default()).await;
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Manifest);
        assert!(transport.calls().await.is_empty());
    }
}
