//! Component-based reconciliation engine
//!
//! - [`instance`]: Instance and Status contracts
//! - [`store`]: State store port and the Kubernetes implementation
//! - [`memory`]: In-process state store
//! - [`context`]: Per-invocation Reconcile Context
//! - [`component`]: Stage contract
//! - [`result`]: Stage results and merging
//! - [`driver`]: Pipeline Driver
//! - [`apply`]: Create-Or-Update Applier
//! - [`templates`]: Target object templates
//! - [`finalizer`]: Deletion lifecycle
//! - [`requeue`]: Requeue Scheduler and backoff
//! - [`controller`]: Controller runtime glue

pub mod apply;
pub mod component;
pub mod context;
pub mod controller;
pub mod driver;
pub mod finalizer;
pub mod instance;
pub mod memory;
pub mod requeue;
pub mod result;
pub mod store;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;


pub use apply::ApplyOutcome;
pub use component::{watch, Cleanup, Component, ComponentRef};
pub use context::ComponentContext;
pub use controller::{ComponentController, ControllerConfig, ControllerInfo};
pub use driver::{Pipeline, PipelineOutcome, TeardownOutcome};
pub use finalizer::LifecycleState;
pub use instance::{Instance, InstanceStatus, ObjectKey, STATUS_DELETING, STATUS_ERROR, STATUS_READY};
pub use memory::MemoryStore;
pub use requeue::{BackoffTracker, Requeue, RequeueConfig};
pub use result::ComponentResult;
pub use store::{KubeStore, ObjectStore, ObjectStoreRef};
pub use templates::{TemplateRenderer, TemplateRendererRef, TemplateSet};
