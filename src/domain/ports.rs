//! Domain Ports - Capability traits used by the reference pipelines
//!
//! Stages talk to external systems only through these traits. Adapters
//! implement them over HTTP; tests implement them in memory.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

// =============================================================================
// RabbitMQ Types
// =============================================================================

/// A broker user as reported by the management API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerUser {
    pub name: String,
    /// Sorted and deduplicated. Brokers before 3.9 send a comma-separated
    /// string, later ones an array.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
}

impl BrokerUser {
    pub fn new(name: impl Into<String>, tags: &str) -> Self {
        Self {
            name: name.into(),
            tags: split_tags(tags),
        }
    }

    /// Whether the user carries exactly the comma-separated `tags`, in any order
    pub fn has_tags(&self, tags: &str) -> bool {
        self.tags == split_tags(tags)
    }
}

/// Normalise a comma-separated tag list
pub fn split_tags(tags: &str) -> Vec<String> {
    normalize_tags(tags.split(','))
}

fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTags {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_tags<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<WireTags>::deserialize(deserializer)? {
        Some(WireTags::Joined(joined)) => split_tags(&joined),
        Some(WireTags::List(list)) => normalize_tags(list),
        None => Vec::new(),
    })
}

/// Body of a user create/update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerUserRequest {
    pub password: String,
    /// Comma-separated, accepted by every broker version
    pub tags: String,
}

/// Permissions of one user on one vhost
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPermissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

// =============================================================================
// RabbitMQ Admin Port
// =============================================================================

/// Management operations on a RabbitMQ broker
#[async_trait]
pub trait RabbitmqAdmin: Send + Sync {
    /// Look up a user, `None` when absent
    async fn get_user(&self, name: &str) -> Result<Option<BrokerUser>>;

    /// Create or replace a user
    async fn put_user(&self, name: &str, request: &BrokerUserRequest) -> Result<()>;

    /// Delete a user. Absent users are not an error.
    async fn delete_user(&self, name: &str) -> Result<()>;

    /// Permissions of a user on a vhost, `None` when unset
    async fn get_permissions(&self, vhost: &str, user: &str) -> Result<Option<BrokerPermissions>>;

    /// Set permissions of a user on a vhost
    async fn put_permissions(&self, vhost: &str, user: &str, permissions: &BrokerPermissions) -> Result<()>;
}

// =============================================================================
// Image Registry Port
// =============================================================================

/// Lists image tags of a repository
#[async_trait]
pub trait TagFetcher: Send + Sync {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Type Aliases for Arc-wrapped traits
// =============================================================================

pub type RabbitmqAdminRef = Arc<dyn RabbitmqAdmin>;
pub type TagFetcherRef = Arc<dyn TagFetcher>;
