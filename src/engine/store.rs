//! State Store Port
//!
//! The narrow get/create/update/delete interface the engine and its stages
//! use to talk to the cluster. Objects travel as [`DynamicObject`] so the
//! trait stays object-safe; typed conversion happens at the edges with
//! [`to_dynamic`] and [`from_dynamic`].

use crate::engine::instance::ObjectKey;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Object Store Port
// =============================================================================

/// Port for state store operations
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// Create a new object
    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object's spec and metadata. A non-empty resourceVersion is
    /// checked; a mismatch yields [`Error::Conflict`].
    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace only the status of an object, with the same conflict check
    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Request deletion, returns false if the object was already gone
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool>;
}

pub type ObjectStoreRef = Arc<dyn ObjectStore>;

// =============================================================================
// Typed Conversion
// =============================================================================

/// API resource description of a statically typed kind
pub fn api_resource<T: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<T>(&())
}

/// Convert a typed object into a dynamic one
pub fn to_dynamic<T: Serialize>(object: &T) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Convert a dynamic object back into its typed form
pub fn from_dynamic<T: DeserializeOwned>(object: DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

// =============================================================================
// Kubernetes Store
// =============================================================================

/// State store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn object_name(resource: &ApiResource, object: &DynamicObject) -> Result<String> {
        object.metadata.name.clone().ok_or_else(|| {
            Error::Internal(format!("{} object without a name", resource.kind))
        })
    }
}

/// Map API status codes onto the engine's error taxonomy
fn map_kube_error(err: kube::Error, resource: &ApiResource, name: &str) -> Error {
    match &err {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::ResourceExists {
                kind: resource.kind.clone(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind: resource.kind.clone(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => Error::ResourceNotFound {
            kind: resource.kind.clone(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 429 => Error::Throttled {
            service: "kubernetes".to_string(),
        },
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self.api(resource, key.namespace.as_deref());
        api.get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(e, resource, &key.to_string()))
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = Self::object_name(resource, object)?;
        debug!("Creating {} {}", resource.kind, name);
        let api = self.api(resource, object.metadata.namespace.as_deref());
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(e, resource, &name))
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let name = Self::object_name(resource, object)?;
        debug!("Updating {} {}", resource.kind, name);
        let api = self.api(resource, object.metadata.namespace.as_deref());
        api.replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(e, resource, &name))
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = Self::object_name(resource, object)?;
        debug!("Updating status of {} {}", resource.kind, name);
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let body = serde_json::to_vec(object)?;
        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error(e, resource, &name))
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        debug!("Deleting {} {}", resource.kind, key);
        let api = self.api(resource, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) => match map_kube_error(e, resource, &key.to_string()) {
                Error::ResourceNotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }
}
