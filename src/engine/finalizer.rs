//! Finalizer / Deletion Lifecycle
//!
//! ```text
//!   Active ──(deletion requested)──▶ Deleting ──(all cleanup complete)──▶ Released
//!     │                                 │
//!     └─ normal pipeline                └─ teardown pipeline, requeue while pending
//! ```

use crate::engine::instance::ObjectKey;
use dashmap::DashMap;
use kube::Resource;

/// Where an Instance is in its deletion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No deletion requested
    Active,
    /// Deletion requested and our finalizer still holds the object
    Deleting,
    /// Deletion requested and nothing of ours holds the object
    Released,
}

/// Classify an object. With `token` set to `None` finalizers are disabled
/// and deletion is never intercepted.
pub fn lifecycle<R: Resource>(object: &R, token: Option<&str>) -> LifecycleState {
    if object.meta().deletion_timestamp.is_none() {
        return LifecycleState::Active;
    }
    match token {
        Some(token) if has_finalizer(object, token) => LifecycleState::Deleting,
        _ => LifecycleState::Released,
    }
}

pub fn has_finalizer<R: Resource>(object: &R, token: &str) -> bool {
    object
        .meta()
        .finalizers
        .as_ref()
        .map_or(false, |f| f.iter().any(|t| t == token))
}

/// Add `token`, returns true if the object changed
pub fn add_finalizer<R: Resource>(object: &mut R, token: &str) -> bool {
    if has_finalizer(object, token) {
        return false;
    }
    object
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(token.to_string());
    true
}

/// Remove `token`, returns true if the object changed
pub fn remove_finalizer<R: Resource>(object: &mut R, token: &str) -> bool {
    match object.meta_mut().finalizers.as_mut() {
        Some(finalizers) => {
            let before = finalizers.len();
            finalizers.retain(|t| t != token);
            finalizers.len() != before
        }
        None => false,
    }
}

// =============================================================================
// Teardown Attempts
// =============================================================================

/// Counts teardown passes per Instance so a stalled cleanup gets surfaced
#[derive(Default)]
pub struct TeardownTracker {
    attempts: DashMap<ObjectKey, u32>,
}

impl TeardownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more incomplete pass and return the attempt number
    pub fn record(&self, key: &ObjectKey) -> u32 {
        let mut entry = self.attempts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Forget an Instance once its teardown finished
    pub fn clear(&self, key: &ObjectKey) {
        self.attempts.remove(key);
    }

    /// Instances with teardown still pending
    pub fn pending(&self) -> usize {
        self.attempts.len()
    }
}

/// Status message for a pass that left cleanup pending
pub fn pending_message(pending: &[(String, String)], attempt: u32, max_attempts: u32) -> String {
    let detail = pending
        .iter()
        .map(|(stage, reason)| format!("{}: {}", stage, reason))
        .collect::<Vec<_>>()
        .join("; ");
    if attempt >= max_attempts {
        format!("cleanup stalled after {} attempts: {}", attempt, detail)
    } else {
        format!("cleanup pending (attempt {}/{}): {}", attempt, max_attempts, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    const TOKEN: &str = "widget.finalizer";

    fn object() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("alpha".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut obj = object();
        assert!(add_finalizer(&mut obj, TOKEN));
        assert!(!add_finalizer(&mut obj, TOKEN));
        assert!(has_finalizer(&obj, TOKEN));

        assert!(remove_finalizer(&mut obj, TOKEN));
        assert!(!remove_finalizer(&mut obj, TOKEN));
        assert!(!has_finalizer(&obj, TOKEN));
    }

    #[test]
    fn test_lifecycle_states() {
        let mut obj = object();
        add_finalizer(&mut obj, TOKEN);
        assert_eq!(lifecycle(&obj, Some(TOKEN)), LifecycleState::Active);

        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(lifecycle(&obj, Some(TOKEN)), LifecycleState::Deleting);
        assert_eq!(lifecycle(&obj, None), LifecycleState::Released);

        remove_finalizer(&mut obj, TOKEN);
        assert_eq!(lifecycle(&obj, Some(TOKEN)), LifecycleState::Released);
    }

    #[test]
    fn test_other_finalizers_are_kept() {
        let mut obj = object();
        obj.metadata.finalizers = Some(vec!["foreign.finalizer".into()]);
        add_finalizer(&mut obj, TOKEN);
        remove_finalizer(&mut obj, TOKEN);
        assert_eq!(obj.metadata.finalizers, Some(vec!["foreign.finalizer".to_string()]));
    }

    #[test]
    fn test_teardown_tracker() {
        let tracker = TeardownTracker::new();
        let key = ObjectKey::namespaced("default", "alpha");
        assert_eq!(tracker.record(&key), 1);
        assert_eq!(tracker.record(&key), 2);
        assert_eq!(tracker.pending(), 1);
        tracker.clear(&key);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_pending_message() {
        let pending = vec![("user".to_string(), "waiting for user removal".to_string())];
        assert_eq!(
            pending_message(&pending, 2, 5),
            "cleanup pending (attempt 2/5): user: waiting for user removal"
        );
        assert_eq!(
            pending_message(&pending, 5, 5),
            "cleanup stalled after 5 attempts: user: waiting for user removal"
        );
    }
}
