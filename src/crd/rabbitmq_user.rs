//! RabbitmqUser CRD
//!
//! A user on a RabbitMQ broker, its tags and its per-vhost permissions. The
//! password is read from a Secret in the same namespace.

use crate::engine::{Instance, InstanceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// RabbitmqUser CRD
// =============================================================================

/// RabbitmqUser declares a broker user managed by the operator
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "db.operator.dev",
    version = "v1beta1",
    kind = "RabbitmqUser",
    plural = "rabbitmqusers",
    shortname = "rmqu",
    status = "RabbitmqUserStatus",
    printcolumn = r#"{"name": "Username", "type": "string", "jsonPath": ".spec.username"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "Message", "type": "string", "jsonPath": ".status.message"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqUserSpec {
    /// Broker username, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Management tags (e.g. `monitoring`, `management`)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Secret holding the password under the `password` key
    pub password_secret: String,

    /// Permissions per vhost
    #[serde(default)]
    pub permissions: Vec<RabbitmqPermission>,
}

/// A single user permission entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqPermission {
    /// Vhost this applies to
    #[serde(default)]
    pub vhost: String,
    /// Configure regex
    #[serde(default)]
    pub configure: String,
    /// Write regex
    #[serde(default)]
    pub write: String,
    /// Read regex
    #[serde(default)]
    pub read: String,
}

/// Observed state of a RabbitmqUser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqUserStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// Ready once the password Secret has been read
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials_status: String,
    /// Ready once the user exists on the broker
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_status: String,
}

impl InstanceStatus for RabbitmqUserStatus {
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

impl Instance for RabbitmqUser {
    type Status = RabbitmqUserStatus;

    fn status(&self) -> Option<&RabbitmqUserStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut RabbitmqUserStatus {
        self.status.get_or_insert_with(RabbitmqUserStatus::default)
    }
}

impl RabbitmqUser {
    /// Username on the broker
    pub fn username(&self) -> String {
        self.spec
            .username
            .clone()
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }

    /// Tags as the management API expects them
    pub fn tag_list(&self) -> String {
        self.spec.tags.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_yaml() {
        let spec: RabbitmqUserSpec = serde_yaml::from_str(
            r#"
passwordSecret: orders-rabbit
tags: [monitoring]
permissions:
  - vhost: orders
    read: ".*"
"#,
        )
        .unwrap();

        assert_eq!(spec.password_secret, "orders-rabbit");
        assert!(spec.username.is_none());
        assert_eq!(spec.permissions[0].vhost, "orders");
        assert_eq!(spec.permissions[0].write, "");
    }

    #[test]
    fn test_username_defaults_to_name() {
        let mut user = RabbitmqUser::new("orders", RabbitmqUserSpec::default());
        assert_eq!(user.username(), "orders");
        user.spec.username = Some("svc-orders".into());
        assert_eq!(user.username(), "svc-orders");
    }

    #[test]
    fn test_empty_sub_statuses_are_omitted() {
        let status = RabbitmqUserStatus {
            status: "Ready".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("credentialsStatus").is_none());
        assert_eq!(json["status"], "Ready");
    }
}
