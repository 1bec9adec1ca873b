//! Reconcile Context
//!
//! One [`ComponentContext`] is built per invocation. It owns the working copy
//! of the Instance, a handle to the state store, the template renderer and
//! the invocation's cancellation token and deadline. Every store call made
//! through the context honors both.

use crate::engine::instance::{Instance, ObjectKey};
use crate::engine::store::{api_resource, from_dynamic, to_dynamic, ObjectStoreRef};
use crate::engine::templates::TemplateRendererRef;
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-invocation bundle handed to every stage
pub struct ComponentContext<K: Instance> {
    /// Working copy of the Instance
    instance: K,
    /// State store handle
    store: ObjectStoreRef,
    /// Renderer for templated target objects
    templates: Option<TemplateRendererRef>,
    /// Invocation cancellation
    cancel: CancellationToken,
    /// Invocation deadline and the budget it was derived from
    deadline: Option<(Instant, Duration)>,
}

impl<K: Instance> ComponentContext<K> {
    /// Create a context for one invocation
    pub fn new(instance: K, store: ObjectStoreRef) -> Self {
        Self {
            instance,
            store,
            templates: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Attach a template renderer
    pub fn with_templates(mut self, templates: TemplateRendererRef) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bound the invocation to `budget` from now
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some((Instant::now() + budget, budget));
        self
    }

    // =========================================================================
    // Instance Access
    // =========================================================================

    pub fn instance(&self) -> &K {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut K {
        &mut self.instance
    }

    pub fn into_instance(self) -> K {
        self.instance
    }

    /// Name of the Instance
    pub fn name(&self) -> String {
        self.instance.name_any()
    }

    /// Namespace of the Instance, `None` when cluster-scoped
    pub fn namespace(&self) -> Option<String> {
        self.instance.namespace()
    }

    /// Key of the Instance
    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.instance)
    }

    /// Key of a sibling object in the Instance's namespace
    pub fn sibling(&self, name: impl Into<String>) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace(),
            name: name.into(),
        }
    }

    /// Controller owner reference pointing at the Instance.
    ///
    /// `None` until the Instance has been persisted and carries a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.instance.controller_owner_ref(&())
    }

    pub fn store(&self) -> &ObjectStoreRef {
        &self.store
    }

    pub fn templates(&self) -> Result<&TemplateRendererRef> {
        self.templates
            .as_ref()
            .ok_or_else(|| Error::Configuration("no template renderer configured".to_string()))
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a blocking operation under the invocation's cancellation and deadline
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some((at, budget)) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    res = tokio::time::timeout_at(at, fut) => match res {
                        Ok(inner) => inner,
                        Err(_) => Err(Error::DeadlineExceeded(budget)),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    res = fut => res,
                }
            }
        }
    }

    // =========================================================================
    // Typed Store Access
    // =========================================================================

    /// Fetch an object in the Instance's namespace
    pub async fn get<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.get_key(&self.sibling(name)).await
    }

    /// Fetch an object by key
    pub async fn get_key<T>(&self, key: &ObjectKey) -> Result<Option<T>>
    where
        T: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let ar = api_resource::<T>();
        match self.guard(self.store.get(&ar, key)).await? {
            Some(obj) => Ok(Some(from_dynamic(obj)?)),
            None => Ok(None),
        }
    }

    /// Create an object, defaulting its namespace to the Instance's
    pub async fn create<T>(&self, object: &T) -> Result<T>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let ar = api_resource::<T>();
        let mut dynamic = to_dynamic(object)?;
        if dynamic.metadata.namespace.is_none() {
            dynamic.metadata.namespace = self.namespace();
        }
        let created = self.guard(self.store.create(&ar, &dynamic)).await?;
        from_dynamic(created)
    }

    /// Replace an object
    pub async fn update<T>(&self, object: &T) -> Result<T>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let ar = api_resource::<T>();
        let dynamic = to_dynamic(object)?;
        let updated = self.guard(self.store.update(&ar, &dynamic)).await?;
        from_dynamic(updated)
    }

    /// Delete an object in the Instance's namespace
    pub async fn delete<T>(&self, name: &str) -> Result<bool>
    where
        T: Resource<DynamicType = ()>,
    {
        let ar = api_resource::<T>();
        let key = self.sibling(name);
        self.guard(self.store.delete(&ar, &key)).await
    }

    // =========================================================================
    // Templates
    // =========================================================================

    /// Render a template into a typed object.
    ///
    /// The template sees `instance` (the working copy) and `extra`.
    pub async fn render<T: DeserializeOwned>(
        &self,
        template: &str,
        extra: &serde_json::Value,
    ) -> Result<T> {
        let data = serde_json::json!({
            "instance": serde_json::to_value(&self.instance)?,
            "extra": extra,
        });
        let rendered = self.templates()?.render(template, &data)?;
        serde_json::from_value(rendered).map_err(|e| Error::Template {
            template: template.to_string(),
            reason: format!("rendered object does not match target type: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryStore;
    use crate::engine::testing::widget;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_typed_access_defaults_namespace() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ComponentContext::new(widget("alpha"), store.clone());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("alpha-creds".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = ctx.create(&secret).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));

        let fetched: Option<Secret> = ctx.get("alpha-creds").await.unwrap();
        assert!(fetched.is_some());
        assert!(ctx.delete::<Secret>("alpha-creds").await.unwrap());
        assert!(ctx.get::<Secret>("alpha-creds").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_context_refuses_calls() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let ctx = ComponentContext::new(widget("alpha"), store.clone()).with_cancellation(token.clone());

        token.cancel();
        let err = ctx.get::<Secret>("anything").await.unwrap_err();
        assert_matches!(err, Error::Cancelled);
        assert!(err.is_transient());
        assert_eq!(store.calls().gets, 0);
    }

    #[tokio::test]
    async fn test_deadline_bounds_blocking_calls() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ComponentContext::new(widget("alpha"), store).with_timeout(Duration::from_millis(10));

        let err = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::DeadlineExceeded(_));
    }

    #[tokio::test]
    async fn test_render_without_renderer_is_a_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ComponentContext::new(widget("alpha"), store);
        let err = ctx
            .render::<Secret>("secret.yml.j2", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Configuration(_));
    }
}
