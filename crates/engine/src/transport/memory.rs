//! In-memory transports.
//!
//! Both transports record every call and can be told to fail a given
//! operation, which makes them suitable for exercising error paths.
//! [`MemoryTransport`] can also delay deletions so that a deleted resource
//! stays visible for a number of reads, the way a real API server keeps an
//! object around until its finalizers run.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{
    ApplyOperation, ApplyOptions, BundleTransport, GroupVersionKind, LabelSelector, ResourceKey, ResourceTransport, TransportError,
    matches_selector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOperation {
    Get,
    Create,
    Update,
    Delete,
    Discover,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    pub operation: TransportOperation,
    /// Resource display name, bundle `target/name`, or the listed kind.
    pub subject: String,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    objects: Mutex<IndexMap<ResourceKey, Value>>,
    pending_deletes: Mutex<HashMap<ResourceKey, u32>>,
    failures: Mutex<HashMap<TransportOperation, TransportError>>,
    calls: Mutex<Vec<TransportCall>>,
    deletion_delay: u32,
    next_uid: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store; documents without apiVersion, kind, or name are ignored.
    pub fn with_objects(objects: impl IntoIterator<Item = Value>) -> Self {
        let objects = objects
            .into_iter()
            .filter_map(|object| ResourceKey::of(&object).map(|key| (key, object)))
            .collect();
        Self {
            objects: Mutex::new(objects),
            ..Self::default()
        }
    }

    /// Deleted resources stay readable for `reads` further gets.
    pub fn with_deletion_delay(mut self, reads: u32) -> Self {
        self.deletion_delay = reads;
        self
    }

    /// Makes every subsequent call of `operation` fail with `error`.
    pub async fn fail_on(&self, operation: TransportOperation, error: TransportError) {
        self.failures.lock().await.insert(operation, error);
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    pub async fn objects(&self) -> Vec<Value> {
        self.objects.lock().await.values().cloned().collect()
    }

    async fn record(&self, operation: TransportOperation, subject: String) -> Result<(), TransportError> {
        self.calls.lock().await.push(TransportCall { operation, subject });
        match self.failures.lock().await.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn key_of(manifest: &Value) -> Result<ResourceKey, TransportError> {
        ResourceKey::of(manifest).ok_or_else(|| TransportError::Invalid("manifest needs apiVersion, kind, and metadata.name".into()))
    }
}

#[async_trait]
impl ResourceTransport for MemoryTransport {
    async fn get_resource(&self, key: &ResourceKey) -> Result<Value, TransportError> {
        self.record(TransportOperation::Get, key.display_name()).await?;
        let mut pending = self.pending_deletes.lock().await;
        let mut objects = self.objects.lock().await;
        if let Some(remaining) = pending.get_mut(key) {
            if *remaining == 0 {
                pending.remove(key);
                objects.shift_remove(key);
                return Err(key.not_found());
            }
            *remaining -= 1;
        }
        objects.get(key).cloned().ok_or_else(|| key.not_found())
    }

    async fn create_resource(&self, manifest: &Value) -> Result<Value, TransportError> {
        let key = Self::key_of(manifest)?;
        self.record(TransportOperation::Create, key.display_name()).await?;
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&key) {
            return Err(TransportError::AlreadyExists {
                kind: key.gvk.kind.clone(),
                name: key.display_name(),
            });
        }
        let mut stored = manifest.clone();
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("uid".into(), json!(format!("uid-{uid}")));
            metadata.insert("resourceVersion".into(), json!("1"));
        }
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_resource(&self, manifest: &Value) -> Result<Value, TransportError> {
        let key = Self::key_of(manifest)?;
        self.record(TransportOperation::Update, key.display_name()).await?;
        let mut objects = self.objects.lock().await;
        let Some(existing) = objects.get(&key) else {
            return Err(key.not_found());
        };

        let current_version = existing.pointer("/metadata/resourceVersion").and_then(Value::as_str).unwrap_or("0").to_string();
        if let Some(requested) = manifest.pointer("/metadata/resourceVersion").and_then(Value::as_str)
            && requested != current_version
        {
            return Err(TransportError::Conflict {
                kind: key.gvk.kind.clone(),
                name: key.display_name(),
                message: format!("resourceVersion {requested} is stale (current {current_version})"),
            });
        }

        let uid = existing.pointer("/metadata/uid").cloned();
        let next_version = current_version.parse::<u64>().unwrap_or(0) + 1;
        let mut stored = manifest.clone();
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            if let Some(uid) = uid {
                metadata.insert("uid".into(), uid);
            }
            metadata.insert("resourceVersion".into(), json!(next_version.to_string()));
        }
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_resource(&self, key: &ResourceKey) -> Result<(), TransportError> {
        self.record(TransportOperation::Delete, key.display_name()).await?;
        let mut pending = self.pending_deletes.lock().await;
        let mut objects = self.objects.lock().await;
        if !objects.contains_key(key) {
            return Err(key.not_found());
        }
        if self.deletion_delay > 0 {
            pending.entry(key.clone()).or_insert(self.deletion_delay);
        } else {
            objects.shift_remove(key);
        }
        Ok(())
    }

    async fn discover_resources(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, TransportError> {
        self.record(TransportOperation::Discover, gvk.to_string()).await?;
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| &key.gvk == gvk && namespace.is_none_or(|namespace| key.namespace.as_deref() == Some(namespace)))
            .filter(|(_, object)| matches_selector(object, selector))
            .map(|(_, object)| object.clone())
            .collect())
    }
}

/// In-memory bundle delivery keyed by `(target, bundle name)`.
#[derive(Debug, Default)]
pub struct MemoryBundleTransport {
    bundles: Mutex<IndexMap<(String, String), Value>>,
    failures: Mutex<HashMap<TransportOperation, TransportError>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MemoryBundleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds delivered bundles; each document's `metadata.namespace` is its target.
    pub fn with_bundles(bundles: impl IntoIterator<Item = Value>) -> Self {
        let bundles = bundles
            .into_iter()
            .filter_map(|bundle| {
                let target = bundle.pointer("/metadata/namespace")?.as_str()?.to_string();
                let name = bundle.pointer("/metadata/name")?.as_str()?.to_string();
                Some(((target, name), bundle))
            })
            .collect();
        Self {
            bundles: Mutex::new(bundles),
            ..Self::default()
        }
    }

    pub async fn fail_on(&self, operation: TransportOperation, error: TransportError) {
        self.failures.lock().await.insert(operation, error);
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    pub async fn bundles(&self) -> Vec<Value> {
        self.bundles.lock().await.values().cloned().collect()
    }

    async fn record(&self, operation: TransportOperation, subject: String) -> Result<(), TransportError> {
        self.calls.lock().await.push(TransportCall { operation, subject });
        match self.failures.lock().await.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn not_found(target: &str, name: &str) -> TransportError {
        TransportError::NotFound {
            kind: "bundle".into(),
            name: format!("{target}/{name}"),
        }
    }
}

#[async_trait]
impl BundleTransport for MemoryBundleTransport {
    async fn apply_resource(&self, bundle: &[u8], options: &ApplyOptions, target: &str) -> Result<Value, TransportError> {
        let mut document: Value =
            serde_json::from_slice(bundle).map_err(|error| TransportError::Invalid(format!("bundle is not valid JSON: {error}")))?;
        let name = document
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Invalid("bundle needs metadata.name".into()))?;
        self.record(TransportOperation::Apply, format!("{target}/{name}")).await?;

        let mut bundles = self.bundles.lock().await;
        let key = (target.to_string(), name.clone());
        let previous_version = match (options.operation, bundles.get(&key)) {
            (ApplyOperation::Create, Some(_)) => {
                return Err(TransportError::AlreadyExists {
                    kind: "bundle".into(),
                    name: format!("{target}/{name}"),
                });
            }
            (ApplyOperation::Update, None) => return Err(Self::not_found(target, &name)),
            (_, existing) => existing
                .and_then(|existing| existing.pointer("/metadata/resourceVersion"))
                .and_then(Value::as_str)
                .and_then(|version| version.parse::<u64>().ok())
                .unwrap_or(0),
        };

        if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("namespace".into(), json!(target));
            metadata.insert("resourceVersion".into(), json!((previous_version + 1).to_string()));
        }
        if let Some(object) = document.as_object_mut() {
            object.insert(
                "status".into(),
                json!({
                    "observedGeneration": options.generation,
                    "conditions": [{"type": "Applied", "status": "True"}]
                }),
            );
        }
        bundles.insert(key, document.clone());
        Ok(document)
    }

    async fn get_bundle(&self, target: &str, name: &str) -> Result<Value, TransportError> {
        self.record(TransportOperation::Get, format!("{target}/{name}")).await?;
        self.bundles
            .lock()
            .await
            .get(&(target.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(target, name))
    }

    async fn delete_bundle(&self, target: &str, name: &str) -> Result<(), TransportError> {
        self.record(TransportOperation::Delete, format!("{target}/{name}")).await?;
        self.bundles
            .lock()
            .await
            .shift_remove(&(target.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(target, name))
    }

    async fn discover_bundles(&self, target: &str, selector: &LabelSelector) -> Result<Vec<Value>, TransportError> {
        self.record(TransportOperation::Discover, target.to_string()).await?;
        Ok(self
            .bundles
            .lock()
            .await
            .iter()
            .filter(|((bundle_target, _), bundle)| bundle_target == target && matches_selector(bundle, selector))
            .map(|(_, bundle)| bundle.clone())
            .collect())
    }
}
