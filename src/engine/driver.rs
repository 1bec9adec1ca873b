//! Pipeline Driver
//!
//! Runs an ordered list of stages against one Reconcile Context. A stage whose
//! gate is false stops the pass, as does a stage error. Status modifiers of
//! every stage that ran are applied in order at the end, so partial progress
//! survives a later failure.

use crate::engine::component::{Cleanup, Component, ComponentRef};
use crate::engine::context::ComponentContext;
use crate::engine::instance::{Instance, InstanceStatus, STATUS_ERROR, STATUS_READY};
use crate::engine::requeue::Requeue;
use crate::engine::result::MergedResult;
use crate::error::Error;
use kube::api::ApiResource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one normal pass
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Stages whose reconcile ran and succeeded, in order
    pub ran: Vec<String>,
    /// Stage whose gate stopped the pass
    pub blocked_on: Option<String>,
    /// Some stage asked for an immediate requeue
    pub requeue: bool,
    /// Shortest timed requeue any stage asked for
    pub requeue_after: Option<Duration>,
    /// First stage failure, already wrapped with the stage name
    pub error: Option<Error>,
}

impl PipelineOutcome {
    /// Next-invocation directive. A blocked gate implies an immediate requeue.
    pub fn requeue(&self) -> Requeue {
        Requeue::decide(
            self.error.is_some(),
            self.requeue || self.blocked_on.is_some(),
            self.requeue_after,
        )
    }

    /// Every stage ran without error
    pub fn completed(&self) -> bool {
        self.blocked_on.is_none() && self.error.is_none()
    }
}

/// Outcome of one teardown pass
#[derive(Debug, Default)]
pub struct TeardownOutcome {
    /// Cleanup stages that reported completion
    pub complete: Vec<String>,
    /// Cleanup stages still waiting, with their reason
    pub pending: Vec<(String, String)>,
    /// First teardown failure, wrapped with the stage name
    pub error: Option<Error>,
}

impl TeardownOutcome {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.error.is_none()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Ordered stages for one Instance kind
pub struct Pipeline<K: Instance> {
    components: Vec<ComponentRef<K>>,
    watch_types: Vec<ApiResource>,
}

impl<K: Instance> Pipeline<K> {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            watch_types: Vec::new(),
        }
    }

    /// Append a stage
    pub fn with<C: Component<K> + 'static>(mut self, component: C) -> Self {
        self.push(Arc::new(component));
        self
    }

    /// Append a shared stage and register its watch types
    pub fn push(&mut self, component: ComponentRef<K>) {
        for ar in component.watch_types() {
            let seen = self
                .watch_types
                .iter()
                .any(|w| w.api_version == ar.api_version && w.kind == ar.kind);
            if !seen {
                self.watch_types.push(ar);
            }
        }
        self.components.push(component);
    }

    /// Deduplicated kinds the stages watch
    pub fn watch_types(&self) -> &[ApiResource] {
        &self.watch_types
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether any stage needs teardown on deletion
    pub fn has_cleanup(&self) -> bool {
        self.components.iter().any(|c| c.owns_cleanup())
    }

    /// Run one normal pass
    pub async fn reconcile(&self, ctx: &mut ComponentContext<K>) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let mut merged = MergedResult::<K>::new();

        for component in &self.components {
            let stage = component.name();
            if ctx.is_cancelled() {
                outcome.error = Some(Error::Cancelled.in_stage(stage));
                break;
            }
            if !component.is_reconcilable(ctx) {
                debug!("Stage {} not reconcilable, stopping pass", stage);
                outcome.blocked_on = Some(stage.to_string());
                break;
            }
            match component.reconcile(ctx).await {
                Ok(result) => {
                    debug!("Stage {} reconciled: {:?}", stage, result);
                    merged.absorb(stage, result);
                    outcome.ran.push(stage.to_string());
                }
                Err(e) => {
                    let err = e.in_stage(stage);
                    warn!("Stage {} failed: {}", stage, err);
                    outcome.error = Some(err);
                    break;
                }
            }
        }

        outcome.requeue = merged.requeue;
        outcome.requeue_after = merged.requeue_after;

        let status = ctx.instance_mut().status_mut();
        let label_before = status.status().to_string();
        if let Err(e) = merged.apply_modifiers(status) {
            warn!("Status modifier failed: {}", e);
            outcome.error.get_or_insert(e);
        }

        match &outcome.error {
            Some(err) => {
                status.set_status(STATUS_ERROR);
                status.set_message(&err.to_string());
            }
            None => {
                let converged = outcome.blocked_on.is_none() && !outcome.requeue;
                if converged && status.status() == label_before {
                    if label_before == STATUS_ERROR {
                        status.set_message("");
                    }
                    status.set_status(STATUS_READY);
                }
            }
        }

        outcome
    }

    /// Run one teardown pass over cleanup-owning stages in reverse order
    pub async fn teardown(&self, ctx: &mut ComponentContext<K>) -> TeardownOutcome {
        let mut outcome = TeardownOutcome::default();

        for component in self.components.iter().rev().filter(|c| c.owns_cleanup()) {
            let stage = component.name();
            match component.finalize(ctx).await {
                Ok(Cleanup::Complete) => outcome.complete.push(stage.to_string()),
                Ok(Cleanup::Pending(reason)) => {
                    debug!("Stage {} cleanup pending: {}", stage, reason);
                    outcome.pending.push((stage.to_string(), reason));
                }
                Err(e) => {
                    let err = e.in_stage(stage);
                    warn!("Stage {} teardown failed: {}", stage, err);
                    outcome.error = Some(err);
                    break;
                }
            }
        }

        outcome
    }
}

impl<K: Instance> Default for Pipeline<K> {
    fn default() -> Self {
        Self::new()
    }
}
