//! Create-Or-Update Applier
//!
//! Fetch the live object; create it (owned by the Instance) when missing;
//! otherwise let the caller merge the fields it owns and write back only
//! when that merge changed something.

use crate::engine::context::ComponentContext;
use crate::engine::instance::{Instance, ObjectKey};
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// What an apply did to the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    /// Whether a write happened
    pub fn applied(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Updated => write!(f, "updated"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Add `owner` unless a reference with the same uid is already there
pub fn set_owner(meta: &mut ObjectMeta, owner: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner);
    }
}

impl<K: Instance> ComponentContext<K> {
    /// Create or update an object owned by the Instance.
    ///
    /// `merge(desired, live)` copies the fields the caller owns onto the
    /// live object. Fields it does not touch are left as the server has them.
    pub async fn create_or_update<T, F>(&self, desired: T, merge: F) -> Result<(ApplyOutcome, T)>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&T, &mut T),
    {
        self.apply_object(desired, merge, true).await
    }

    /// Create or update an object without making the Instance its owner
    pub async fn create_or_update_unowned<T, F>(
        &self,
        desired: T,
        merge: F,
    ) -> Result<(ApplyOutcome, T)>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&T, &mut T),
    {
        self.apply_object(desired, merge, false).await
    }

    /// Render `template` and apply the result as an owned object
    pub async fn apply_template<T, F>(
        &self,
        template: &str,
        extra: &serde_json::Value,
        merge: F,
    ) -> Result<(ApplyOutcome, T)>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&T, &mut T),
    {
        let desired: T = self.render(template, extra).await?;
        self.create_or_update(desired, merge).await
    }

    async fn apply_object<T, F>(&self, desired: T, merge: F, owned: bool) -> Result<(ApplyOutcome, T)>
    where
        T: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&T, &mut T),
    {
        let kind = T::kind(&()).to_string();
        let name = desired
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::InvalidSpec(format!("desired {} has no name", kind)))?;
        let namespace = desired.meta().namespace.clone().or_else(|| self.namespace());
        let key = ObjectKey {
            namespace: namespace.clone(),
            name,
        };

        match self.get_key::<T>(&key).await? {
            None => {
                let mut desired = desired;
                desired.meta_mut().namespace = namespace;
                if owned {
                    let owner = self.owner_reference().ok_or_else(|| {
                        Error::Internal(format!(
                            "{} has no uid, cannot own {} {}",
                            self.key(),
                            kind,
                            key
                        ))
                    })?;
                    set_owner(desired.meta_mut(), owner);
                }
                let created = self.create(&desired).await?;
                info!("Created {} {}", kind, key);
                Ok((ApplyOutcome::Created, created))
            }
            Some(mut live) => {
                let before = serde_json::to_value(&live)?;
                merge(&desired, &mut live);
                if serde_json::to_value(&live)? == before {
                    debug!("{} {} unchanged", kind, key);
                    return Ok((ApplyOutcome::Unchanged, live));
                }
                let updated = self.update(&live).await?;
                info!("Updated {} {}", kind, key);
                Ok((ApplyOutcome::Updated, updated))
            }
        }
    }
}
