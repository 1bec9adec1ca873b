//! Stage Contract
//!
//! A [`Component`] is one named, single-purpose unit of a pipeline. It gates
//! on the current Instance state, acts on external systems or the Instance,
//! and declares the object kinds whose changes should re-trigger it.

use crate::engine::context::ComponentContext;
use crate::engine::instance::Instance;
use crate::engine::result::ComponentResult;
use crate::error::Result;
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::Resource;
use std::sync::Arc;

/// Teardown report from a cleanup-owning stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    /// External side effects are gone
    Complete,
    /// Still waiting, with a short reason for the status message
    Pending(String),
}

impl Cleanup {
    pub fn is_complete(&self) -> bool {
        matches!(self, Cleanup::Complete)
    }
}

/// A stage in a reconciliation pipeline
#[async_trait]
pub trait Component<K: Instance>: Send + Sync {
    /// Stage name, used in logs, metrics and wrapped errors
    fn name(&self) -> &str;

    /// Kinds owned by this stage whose changes re-trigger the Instance.
    /// Read once when the pipeline is built.
    fn watch_types(&self) -> Vec<ApiResource> {
        Vec::new()
    }

    /// Pure, cheap gate over the current Instance state. Returning false
    /// defers this stage and every stage after it.
    fn is_reconcilable(&self, ctx: &ComponentContext<K>) -> bool;

    /// Do the work. Must be a no-op when already converged.
    async fn reconcile(&self, ctx: &mut ComponentContext<K>) -> Result<ComponentResult<K>>;

    /// Whether this stage leaves external side effects that need teardown
    fn owns_cleanup(&self) -> bool {
        false
    }

    /// Undo external side effects during deletion
    async fn finalize(&self, _ctx: &mut ComponentContext<K>) -> Result<Cleanup> {
        Ok(Cleanup::Complete)
    }
}

pub type ComponentRef<K> = Arc<dyn Component<K>>;

/// Watch declaration for a statically typed kind
pub fn watch<T: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<T>(&())
}
