//! Stage results and their merge into one pass outcome

use crate::engine::instance::Instance;
use crate::error::Result;
use std::fmt;
use std::time::Duration;

/// Partial status update owned by a single stage
pub type StatusModifier<S> = Box<dyn FnOnce(&mut S) -> Result<()> + Send>;

// =============================================================================
// Component Result
// =============================================================================

/// Value returned by a stage's reconcile
pub struct ComponentResult<K: Instance> {
    /// Re-invoke as soon as the runtime allows
    pub requeue: bool,
    /// Re-invoke no earlier than this
    pub requeue_after: Option<Duration>,
    /// Status fields this stage owns
    pub status_modifier: Option<StatusModifier<K::Status>>,
}

impl<K: Instance> ComponentResult<K> {
    /// Converged, nothing to ask for
    pub fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
            status_modifier: None,
        }
    }

    /// Not ready yet, try again right away
    pub fn requeue_now() -> Self {
        Self {
            requeue: true,
            ..Self::done()
        }
    }

    /// Come back after `delay`
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
            ..Self::done()
        }
    }

    /// Attach a status modifier
    pub fn with_status<F>(mut self, modifier: F) -> Self
    where
        F: FnOnce(&mut K::Status) -> Result<()> + Send + 'static,
    {
        self.status_modifier = Some(Box::new(modifier));
        self
    }
}

impl<K: Instance> Default for ComponentResult<K> {
    fn default() -> Self {
        Self::done()
    }
}

impl<K: Instance> fmt::Debug for ComponentResult<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentResult")
            .field("requeue", &self.requeue)
            .field("requeue_after", &self.requeue_after)
            .field("status_modifier", &self.status_modifier.is_some())
            .finish()
    }
}

// =============================================================================
// Merged Result
// =============================================================================

/// Results of every stage that ran in one pass.
///
/// Immediate requeue wins over a timed requeue, and the shortest timed
/// requeue wins among stages. Modifiers keep stage order.
pub struct MergedResult<K: Instance> {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
    modifiers: Vec<(String, StatusModifier<K::Status>)>,
}

impl<K: Instance> MergedResult<K> {
    pub fn new() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
            modifiers: Vec::new(),
        }
    }

    /// Fold one stage's result in
    pub fn absorb(&mut self, stage: &str, result: ComponentResult<K>) {
        self.requeue |= result.requeue;
        self.requeue_after = match (self.requeue_after, result.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(modifier) = result.status_modifier {
            self.modifiers.push((stage.to_string(), modifier));
        }
    }

    /// Number of pending modifiers
    pub fn pending_modifiers(&self) -> usize {
        self.modifiers.len()
    }

    /// Apply all modifiers in stage order. The first failing modifier stops
    /// the run and its error carries the stage name.
    pub fn apply_modifiers(&mut self, status: &mut K::Status) -> Result<()> {
        for (stage, modifier) in self.modifiers.drain(..) {
            modifier(status).map_err(|e| e.in_stage(&stage))?;
        }
        Ok(())
    }
}

impl<K: Instance> Default for MergedResult<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Instance> fmt::Debug for MergedResult<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedResult")
            .field("requeue", &self.requeue)
            .field("requeue_after", &self.requeue_after)
            .field("modifiers", &self.modifiers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::instance::InstanceStatus;
    use crate::engine::testing::Widget;
    use crate::error::Error;

    #[test]
    fn test_requeue_precedence() {
        let mut merged = MergedResult::<Widget>::new();
        merged.absorb("a", ComponentResult::requeue_after(Duration::from_secs(30)));
        merged.absorb("b", ComponentResult::requeue_after(Duration::from_secs(10)));
        assert!(!merged.requeue);
        assert_eq!(merged.requeue_after, Some(Duration::from_secs(10)));

        merged.absorb("c", ComponentResult::requeue_now());
        assert!(merged.requeue);
    }

    #[test]
    fn test_modifiers_apply_in_stage_order() {
        let mut merged = MergedResult::<Widget>::new();
        merged.absorb(
            "first",
            ComponentResult::<Widget>::done().with_status(|s| {
                s.set_message("first");
                Ok(())
            }),
        );
        merged.absorb(
            "second",
            ComponentResult::<Widget>::done().with_status(|s| {
                let message = format!("{} then second", s.message());
                s.set_message(&message);
                Ok(())
            }),
        );
        assert_eq!(merged.pending_modifiers(), 2);

        let mut status = Default::default();
        merged.apply_modifiers(&mut status).unwrap();
        assert_eq!(status.message(), "first then second");
        assert_eq!(merged.pending_modifiers(), 0);
    }

    #[test]
    fn test_failing_modifier_names_its_stage() {
        let mut merged = MergedResult::<Widget>::new();
        merged.absorb(
            "ports",
            ComponentResult::<Widget>::done().with_status(|_| Err(Error::InvalidSpec("port out of range".into()))),
        );

        let mut status = Default::default();
        let err = merged.apply_modifiers(&mut status).unwrap_err();
        assert_eq!(err.stage(), Some("ports"));
    }
}
