//! Requeue Scheduler
//!
//! Turns the outcome of one invocation into the next-invocation directive
//! and tracks per-Instance exponential backoff for failing invocations.

use crate::engine::instance::ObjectKey;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use std::time::Duration;

/// Next-invocation directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// As soon as the runtime's queue permits
    Immediate,
    /// No earlier than the given delay
    After(Duration),
    /// Only when a watched object changes
    AwaitChange,
    /// A stage failed, retry with backoff
    Backoff,
}

impl Requeue {
    /// Pick the directive for one pass.
    ///
    /// An error always wins, then an immediate requeue (asked for or implied
    /// by a blocked gate), then the shortest timed requeue.
    pub fn decide(failed: bool, requeue_now: bool, requeue_after: Option<Duration>) -> Self {
        if failed {
            Requeue::Backoff
        } else if requeue_now {
            Requeue::Immediate
        } else if let Some(delay) = requeue_after {
            Requeue::After(delay)
        } else {
            Requeue::AwaitChange
        }
    }

    /// Convert to a runtime action. `Backoff` is resolved by the error
    /// policy, so here it maps to the immediate delay.
    pub fn into_action(self, config: &RequeueConfig) -> Action {
        match self {
            Requeue::Immediate | Requeue::Backoff => Action::requeue(config.immediate_delay),
            Requeue::After(delay) => Action::requeue(delay.max(config.immediate_delay)),
            Requeue::AwaitChange => match config.resync_interval {
                Some(interval) => Action::requeue(interval),
                None => Action::await_change(),
            },
        }
    }
}

/// Requeue timing configuration
#[derive(Debug, Clone)]
pub struct RequeueConfig {
    /// Floor for immediate and timed requeues
    pub immediate_delay: Duration,
    /// Periodic resync in steady state, `None` to rely on watches only
    pub resync_interval: Option<Duration>,
    /// First backoff delay
    pub backoff_initial: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            immediate_delay: Duration::from_secs(1),
            resync_interval: None,
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Backoff Tracker
// =============================================================================

/// Per-Instance exponential backoff state
pub struct BackoffTracker {
    initial: Duration,
    max: Duration,
    entries: DashMap<ObjectKey, ExponentialBackoff>,
}

impl BackoffTracker {
    pub fn new(config: &RequeueConfig) -> Self {
        Self {
            initial: config.backoff_initial,
            max: config.backoff_max,
            entries: DashMap::new(),
        }
    }

    fn fresh(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            max_interval: self.max,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Record a failure and return the delay before the next attempt
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| self.fresh());
        entry.next_backoff().unwrap_or(self.max)
    }

    /// Forget failures after a successful invocation
    pub fn reset(&self, key: &ObjectKey) {
        self.entries.remove(key);
    }

    /// Number of Instances currently backing off
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_priority() {
        let after = Some(Duration::from_secs(30));
        assert_eq!(Requeue::decide(true, true, after), Requeue::Backoff);
        assert_eq!(Requeue::decide(false, true, after), Requeue::Immediate);
        assert_eq!(Requeue::decide(false, false, after), Requeue::After(Duration::from_secs(30)));
        assert_eq!(Requeue::decide(false, false, None), Requeue::AwaitChange);
    }

    #[test]
    fn test_into_action() {
        let config = RequeueConfig::default();
        assert_eq!(
            Requeue::Immediate.into_action(&config),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(
            Requeue::After(Duration::from_millis(10)).into_action(&config),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(Requeue::AwaitChange.into_action(&config), Action::await_change());

        let resync = RequeueConfig {
            resync_interval: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        assert_eq!(
            Requeue::AwaitChange.into_action(&resync),
            Action::requeue(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let config = RequeueConfig {
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(4),
            ..Default::default()
        };
        let tracker = BackoffTracker::new(&config);
        let key = ObjectKey::namespaced("default", "alpha");

        assert_eq!(tracker.next_delay(&key), Duration::from_secs(1));
        assert_eq!(tracker.next_delay(&key), Duration::from_secs(2));
        assert_eq!(tracker.next_delay(&key), Duration::from_secs(4));
        assert_eq!(tracker.next_delay(&key), Duration::from_secs(4));

        // Other Instances are independent
        let other = ObjectKey::namespaced("default", "beta");
        assert_eq!(tracker.next_delay(&other), Duration::from_secs(1));
        assert_eq!(tracker.len(), 2);

        tracker.reset(&key);
        assert_eq!(tracker.next_delay(&key), Duration::from_secs(1));
    }
}
