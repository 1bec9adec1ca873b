//! Instance Contract
//!
//! Every custom resource driven by a pipeline implements [`Instance`], which
//! ties the resource to its strongly typed Status. Stages are compiled against
//! the concrete Spec/Status types they need.

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Status value written once every stage has converged
pub const STATUS_READY: &str = "Ready";

/// Status value written when a stage fails
pub const STATUS_ERROR: &str = "Error";

/// Status value written while teardown is pending
pub const STATUS_DELETING: &str = "Deleting";

// =============================================================================
// Status
// =============================================================================

/// The uniform part of every Instance status: a top-level status label and
/// a free-text message for operator-visible diagnostics.
pub trait InstanceStatus:
    Clone + Default + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Current status label (Ready, Error or a kind-specific progress label)
    fn status(&self) -> &str;

    /// Current diagnostic message
    fn message(&self) -> &str;

    fn set_status(&mut self, status: &str);

    fn set_message(&mut self, message: &str);

    /// Whether the status label is Ready
    fn is_ready(&self) -> bool {
        self.status() == STATUS_READY
    }
}

// =============================================================================
// Instance
// =============================================================================

/// A top-level namespaced custom resource under reconciliation
pub trait Instance:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Engine-authored observed state
    type Status: InstanceStatus;

    /// Status if one has been written
    fn status(&self) -> Option<&Self::Status>;

    /// Mutable status, created with defaults if absent
    fn status_mut(&mut self) -> &mut Self::Status;
}

// =============================================================================
// Object Key
// =============================================================================

/// Identity of an object in the state store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing resource
    pub fn of<R: Resource>(resource: &R) -> Self {
        let meta = resource.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
