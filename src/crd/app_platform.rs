//! AppPlatform CRD
//!
//! A containerized application: its image version (pinned or tracked from a
//! branch), replicas, input Secrets merged into one app secret, and plain
//! configuration values exposed to the workload.

use crate::engine::{Instance, InstanceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// AppPlatform CRD
// =============================================================================

/// AppPlatform declares one deployed application
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.operator.dev",
    version = "v1beta1",
    kind = "AppPlatform",
    plural = "appplatforms",
    shortname = "app",
    status = "AppPlatformStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".spec.version"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "Deployment", "type": "string", "jsonPath": ".status.deploymentStatus"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AppPlatformSpec {
    /// Image tag to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Track the newest build of this branch instead of a pinned version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_deploy: Option<String>,

    /// Pod replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Image repository, defaults to the operator-wide repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Secrets merged into `<name>.app-secrets`, later entries win
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Plain environment values
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Observed state of an AppPlatform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppPlatformStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// Ready once the merged app secret is in place
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_secrets_status: String,
    /// Deployment rollout state
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_status: String,
}

impl InstanceStatus for AppPlatformStatus {
    fn status(&self) -> &str {
        &self.status
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
    }
}

impl Instance for AppPlatform {
    type Status = AppPlatformStatus;

    fn status(&self) -> Option<&AppPlatformStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut AppPlatformStatus {
        self.status.get_or_insert_with(AppPlatformStatus::default)
    }
}

impl AppPlatform {
    /// Name of the merged app secret
    pub fn app_secrets_name(&self) -> String {
        format!("{}.app-secrets", self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Full image reference, if a version is known
    pub fn image_ref(&self) -> Option<String> {
        match (&self.spec.image, &self.spec.version) {
            (Some(image), Some(version)) => Some(format!("{}:{}", image, version)),
            _ => None,
        }
    }

    pub fn app_secrets_ready(&self) -> bool {
        self.status
            .as_ref()
            .map_or(false, |s| s.app_secrets_status == crate::engine::STATUS_READY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: AppPlatformSpec = serde_yaml::from_str("autoDeploy: main\n").unwrap();
        assert_eq!(spec.auto_deploy.as_deref(), Some("main"));
        assert!(spec.version.is_none());
        assert!(spec.secrets.is_empty());
    }

    #[test]
    fn test_image_ref() {
        let mut app = AppPlatform::new("web", AppPlatformSpec::default());
        assert!(app.image_ref().is_none());
        app.spec.image = Some("registry.local/web".into());
        app.spec.version = Some("12-abc1234-main".into());
        assert_eq!(app.image_ref().as_deref(), Some("registry.local/web:12-abc1234-main"));
        assert_eq!(app.app_secrets_name(), "web.app-secrets");
    }
}
