//! In-Memory State Store
//!
//! A resourceVersion-checked [`ObjectStore`] kept entirely in process. It
//! mimics the API server semantics the engine depends on: optimistic
//! concurrency, the status subresource, and finalizer-gated deletion.
//! Used by tests and benchmarks.

use crate::engine::instance::ObjectKey;
use crate::engine::store::ObjectStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject};
use kube::core::TypeMeta;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

// =============================================================================
// Call Counters
// =============================================================================

/// Snapshot of the calls made against the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

impl StoreCalls {
    /// Number of calls that changed state
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
    deletes: AtomicUsize,
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process state store backed by DashMap
pub struct MemoryStore {
    objects: DashMap<String, DynamicObject>,
    resource_version: AtomicU64,
    pending_conflicts: AtomicUsize,
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            resource_version: AtomicU64::new(0),
            pending_conflicts: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Calls made so far
    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            gets: self.counters.gets.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            status_updates: self.counters.status_updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    /// Reset the call counters
    pub fn reset_calls(&self) {
        self.counters.gets.store(0, Ordering::Relaxed);
        self.counters.creates.store(0, Ordering::Relaxed);
        self.counters.updates.store(0, Ordering::Relaxed);
        self.counters.status_updates.store(0, Ordering::Relaxed);
        self.counters.deletes.store(0, Ordering::Relaxed);
    }

    /// Make the next `count` writes (update or status update) fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::Relaxed);
    }

    fn storage_key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            resource.api_version,
            resource.kind,
            namespace.unwrap_or(""),
            name
        )
    }

    fn object_key(resource: &ApiResource, object: &DynamicObject) -> Result<(String, String)> {
        let name = object.metadata.name.clone().ok_or_else(|| {
            Error::Internal(format!("{} object without a name", resource.kind))
        })?;
        let key = Self::storage_key(resource, object.metadata.namespace.as_deref(), &name);
        Ok((key, name))
    }

    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Verify the caller's resourceVersion against the stored object
    fn check_version(
        &self,
        resource: &ApiResource,
        name: &str,
        stored: &DynamicObject,
        incoming: &DynamicObject,
    ) -> Result<()> {
        let conflict = Error::Conflict {
            kind: resource.kind.clone(),
            name: name.to_string(),
        };
        if self.take_conflict() {
            return Err(conflict);
        }
        match incoming.metadata.resource_version.as_deref() {
            Some(version) if !version.is_empty() => {
                if stored.metadata.resource_version.as_deref() == Some(version) {
                    Ok(())
                } else {
                    Err(conflict)
                }
            }
            _ => Ok(()),
        }
    }

    /// Remove objects whose deletion was requested and whose finalizers are gone
    fn collect_if_released(&self, key: &str) {
        self.objects.remove_if(key, |_, obj| {
            obj.metadata.deletion_timestamp.is_some()
                && obj.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty())
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let storage_key = Self::storage_key(resource, key.namespace.as_deref(), &key.name);
        Ok(self.objects.get(&storage_key).map(|obj| obj.clone()))
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        let (key, name) = Self::object_key(resource, object)?;

        let mut created = object.clone();
        created.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        let version = self.next_version();
        created.metadata.uid = Some(format!("uid-{}", version));
        created.metadata.resource_version = Some(version);
        created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        created.metadata.deletion_timestamp = None;

        match self.objects.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::ResourceExists {
                kind: resource.kind.clone(),
                name,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!("Created {} {}", resource.kind, name);
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        let (key, name) = Self::object_key(resource, object)?;

        let updated = {
            let mut stored = self.objects.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
                kind: resource.kind.clone(),
                name: name.clone(),
            })?;
            self.check_version(resource, &name, &stored, object)?;

            let mut updated = object.clone();
            // Server-owned fields survive a replace
            updated.types = stored.types.clone();
            updated.metadata.uid = stored.metadata.uid.clone();
            updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
            updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
            updated.metadata.resource_version = Some(self.next_version());
            set_status(&mut updated, stored.data.get("status").cloned());

            *stored = updated.clone();
            updated
        };

        self.collect_if_released(&key);
        Ok(updated)
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.counters.status_updates.fetch_add(1, Ordering::Relaxed);
        let (key, name) = Self::object_key(resource, object)?;

        let mut stored = self.objects.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: resource.kind.clone(),
            name: name.clone(),
        })?;
        self.check_version(resource, &name, &stored, object)?;

        set_status(&mut stored, object.data.get("status").cloned());
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let storage_key = Self::storage_key(resource, key.namespace.as_deref(), &key.name);

        let has_finalizers = match self.objects.get(&storage_key) {
            Some(obj) => obj.metadata.finalizers.as_ref().map_or(false, |f| !f.is_empty()),
            None => return Ok(false),
        };

        if has_finalizers {
            if let Some(mut obj) = self.objects.get_mut(&storage_key) {
                if obj.metadata.deletion_timestamp.is_none() {
                    obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                    obj.metadata.resource_version = Some(self.next_version());
                }
            }
            debug!("Marked {} {} for deletion", resource.kind, key);
        } else {
            self.objects.remove(&storage_key);
            debug!("Deleted {} {}", resource.kind, key);
        }
        Ok(true)
    }
}

fn set_status(object: &mut DynamicObject, status: Option<serde_json::Value>) {
    if let serde_json::Value::Object(map) = &mut object.data {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::{api_resource, from_dynamic, to_dynamic};
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_server_fields() {
        let store = MemoryStore::new();
        let ar = api_resource::<ConfigMap>();

        let created = store
            .create(&ar, &to_dynamic(&config_map("a")).unwrap())
            .await
            .unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store
            .create(&ar, &to_dynamic(&config_map("a")).unwrap())
            .await
            .unwrap_err();
        assert_matches!(err, Error::ResourceExists { .. });
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let ar = api_resource::<ConfigMap>();
        let created = store
            .create(&ar, &to_dynamic(&config_map("a")).unwrap())
            .await
            .unwrap();

        let mut first = created.clone();
        first.data["data"]["key"] = "first".into();
        store.update(&ar, &first).await.unwrap();

        // Second writer still holds the original resourceVersion
        let mut second = created;
        second.data["data"]["key"] = "second".into();
        let err = store.update(&ar, &second).await.unwrap_err();
        assert!(err.is_conflict());

        let stored: ConfigMap = from_dynamic(
            store
                .get(&ar, &ObjectKey::namespaced("default", "a"))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(stored.data.unwrap()["key"], "first");
    }

    #[tokio::test]
    async fn test_injected_conflict() {
        let store = MemoryStore::new();
        let ar = api_resource::<ConfigMap>();
        let created = store
            .create(&ar, &to_dynamic(&config_map("a")).unwrap())
            .await
            .unwrap();

        store.inject_conflicts(1);
        assert!(store.update(&ar, &created).await.unwrap_err().is_conflict());
        assert!(store.update(&ar, &created).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_and_status_are_separate() {
        let store = MemoryStore::new();
        let ar = api_resource::<ConfigMap>();
        let created = store
            .create(&ar, &to_dynamic(&config_map("a")).unwrap())
            .await
            .unwrap();

        let mut with_status = created.clone();
        with_status.data["status"] = serde_json::json!({"status": "Ready"});
        let after_status = store.update_status(&ar, &with_status).await.unwrap();
        assert_eq!(after_status.data["status"]["status"], "Ready");

        // A plain update cannot clear the status
        let mut without_status = after_status.clone();
        set_status(&mut without_status, None);
        let after_update = store.update(&ar, &without_status).await.unwrap();
        assert_eq!(after_update.data["status"]["status"], "Ready");
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let ar = api_resource::<ConfigMap>();
        let key = ObjectKey::namespaced("default", "a");

        let mut cm = config_map("a");
        cm.metadata.finalizers = Some(vec!["example.finalizer".into()]);
        store.create(&ar, &to_dynamic(&cm).unwrap()).await.unwrap();

        assert!(store.delete(&ar, &key).await.unwrap());
        let marked = store.get(&ar, &key).await.unwrap().unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut released = marked;
        released.metadata.finalizers = Some(vec![]);
        store.update(&ar, &released).await.unwrap();
        assert!(store.get(&ar, &key).await.unwrap().is_none());
        assert!(!store.delete(&ar, &key).await.unwrap());
    }
}
