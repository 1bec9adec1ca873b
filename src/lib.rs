//! Component Operator - Component-based reconciliation engine
//!
//! A Kubernetes operator whose controllers are pipelines of small, named
//! stages. Each stage gates on the current Instance state, converges one
//! concern, and contributes its own slice of the Instance status.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   kube::runtime::Controller (per kind)               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                        ComponentController                           │
//! │   lifecycle ─► finalizer ─► Pipeline / Teardown ─► status ─► requeue │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐      │
//! │   │  Stage 1  │ ─►│  Stage 2  │ ─►│  Stage 3  │ ─►│  Stage n  │      │
//! │   └───────────┘   └───────────┘   └───────────┘   └───────────┘      │
//! │          Reconcile Context: working copy, store, templates           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │     ObjectStore (KubeStore | MemoryStore)   │   Capability ports     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`engine`]: Stage contract, pipeline driver, applier, finalizers, requeue
//! - [`controllers`]: Reference pipelines (RabbitmqUser, AppPlatform)
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Capability ports and HTTP adapters
//! - [`api`]: Health, metrics and controller listing
//! - [`metrics`]: Prometheus collectors
//! - [`error`]: Error types and handling

pub mod api;
pub mod controllers;
pub mod crd;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use crd::{
    AppPlatform, AppPlatformSpec, AppPlatformStatus, RabbitmqPermission, RabbitmqUser,
    RabbitmqUserSpec, RabbitmqUserStatus,
};

pub use domain::ports::{RabbitmqAdmin, RabbitmqAdminRef, TagFetcher, TagFetcherRef};

pub use engine::{
    Cleanup, Component, ComponentContext, ComponentController, ComponentResult, ControllerConfig,
    Instance, InstanceStatus, KubeStore, MemoryStore, ObjectStore, ObjectStoreRef, Pipeline,
    Requeue, RequeueConfig, TemplateSet,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::EngineMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
