//! AppPlatform pipeline
//!
//! `defaults` → `autodeploy` → `app-secrets` → `deployment` → `service`.
//! Every object it creates is owned by the Instance, so nothing needs a
//! finalizer.

pub mod app_secrets;
pub mod autodeploy;
pub mod defaults;
pub mod deployment;
pub mod service;

use crate::crd::AppPlatform;
use crate::domain::TagCache;
use crate::engine::Pipeline;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use std::time::Duration;

pub use app_secrets::AppSecrets;
pub use autodeploy::AutoDeploy;
pub use defaults::Defaults;
pub use deployment::Workload;
pub use service::AppService;

pub const CONTROLLER_NAME: &str = "appplatform";

/// Operator-wide defaults injected into the stages
#[derive(Debug, Clone)]
pub struct AppPlatformSettings {
    /// Image repository used when `spec.image` is unset
    pub default_image: String,
    pub default_replicas: i32,
    /// Container and Service port
    pub port: i32,
    /// How often a tracked branch is checked for new builds
    pub tag_poll_interval: Duration,
    /// How often a rollout in progress is checked
    pub rollout_poll_interval: Duration,
}

impl Default for AppPlatformSettings {
    fn default() -> Self {
        Self {
            default_image: String::new(),
            default_replicas: 1,
            port: 8080,
            tag_poll_interval: Duration::from_secs(60),
            rollout_poll_interval: Duration::from_secs(10),
        }
    }
}

pub fn pipeline(settings: &AppPlatformSettings, tags: Arc<TagCache>) -> Pipeline<AppPlatform> {
    Pipeline::new()
        .with(Defaults::new(settings.default_image.clone(), settings.default_replicas))
        .with(AutoDeploy::new(tags, settings.tag_poll_interval))
        .with(AppSecrets)
        .with(Workload::new(settings.port, settings.rollout_poll_interval))
        .with(AppService::new(settings.port))
}

/// Add the desired labels to the live ones, keeping labels set by others
pub(crate) fn merge_labels(desired: &ObjectMeta, live: &mut ObjectMeta) {
    let labels = match &desired.labels {
        Some(labels) if !labels.is_empty() => labels,
        _ => return,
    };
    let live_labels = live.labels.get_or_insert_with(Default::default);
    for (key, value) in labels {
        live_labels.insert(key.clone(), value.clone());
    }
}

/// Rebuild `live` in the order of `desired`, matching entries by `key`.
///
/// Matched entries keep whatever `merge` does not overwrite, so fields the
/// API server defaults (a port's `protocol`, say) survive.
pub(crate) fn merge_list<T, K, F, M>(desired: &[T], mut live: Vec<T>, key: F, merge: M) -> Vec<T>
where
    T: Clone,
    K: PartialEq,
    F: Fn(&T) -> K,
    M: Fn(&T, &mut T),
{
    desired
        .iter()
        .map(|want| match live.iter().position(|have| key(have) == key(want)) {
            Some(index) => {
                let mut have = live.swap_remove(index);
                merge(want, &mut have);
                have
            }
            None => want.clone(),
        })
        .collect()
}
