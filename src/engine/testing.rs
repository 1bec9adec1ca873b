//! Test fixtures: a minimal Instance kind and a scriptable stage

use crate::engine::component::{watch, Cleanup, Component};
use crate::engine::context::ComponentContext;
use crate::engine::instance::{Instance, InstanceStatus};
use crate::engine::result::ComponentResult;
use crate::engine::store::{api_resource, from_dynamic, to_dynamic, ObjectStoreRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{ApiResource, ObjectMeta};
use kube::{CustomResource, Resource};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "test.operator.dev",
    version = "v1",
    kind = "Widget",
    namespaced,
    status = "WidgetStatus"
)]
pub struct WidgetSpec {
    #[serde(default)]
    pub size: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct WidgetStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl InstanceStatus for WidgetStatus {
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

impl Instance for Widget {
    type Status = WidgetStatus;

    fn status(&self) -> Option<&WidgetStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut WidgetStatus {
        self.status.get_or_insert_with(WidgetStatus::default)
    }
}

impl Widget {
    pub fn status_label(&self) -> String {
        self.status.as_ref().map(|s| s.status.clone()).unwrap_or_default()
    }
}

/// Unpersisted widget with a uid
pub fn widget(name: &str) -> Widget {
    let mut w = Widget::new(name, WidgetSpec { size: 1 });
    w.metadata = ObjectMeta {
        name: Some(name.into()),
        namespace: Some("default".into()),
        uid: Some(format!("uid-{}", name)),
        ..Default::default()
    };
    w
}

/// Widget created in `store`
pub async fn persisted_widget(store: &ObjectStoreRef, name: &str) -> Widget {
    let mut w = widget(name);
    w.metadata.uid = None;
    let created = store
        .create(&api_resource::<Widget>(), &to_dynamic(&w).unwrap())
        .await
        .unwrap();
    from_dynamic(created).unwrap()
}

/// Fetch the stored widget, `None` once it has been removed
pub async fn stored_widget(store: &ObjectStoreRef, name: &str) -> Option<Widget> {
    let key = crate::engine::instance::ObjectKey::namespaced("default", name);
    store
        .get(&api_resource::<Widget>(), &key)
        .await
        .unwrap()
        .map(|obj| from_dynamic(obj).unwrap())
}

// =============================================================================
// Scripted Stage
// =============================================================================

/// What a scripted stage does when reconciled
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Noop,
    Fail,
    RequeueNow,
    RequeueAfter(Duration),
    SetPhase(&'static str),
    SetStatus(&'static str),
}

/// When a scripted stage's gate opens
#[derive(Debug, Clone, Copy)]
pub enum Gate {
    Open,
    Closed,
    Phase(&'static str),
}

pub type ScriptLog = Arc<Mutex<Vec<String>>>;

/// Scriptable stage that records every call in a shared log
pub struct Scripted {
    name: String,
    log: ScriptLog,
    gate: Gate,
    step: Step,
    cleanup: Option<AtomicU32>,
    watches: Vec<ApiResource>,
}

impl Scripted {
    pub fn log() -> ScriptLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn new(name: &str, log: &ScriptLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            gate: Gate::Open,
            step: Step::Noop,
            cleanup: None,
            watches: Vec::new(),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Gate::Closed;
        self
    }

    pub fn gated_on_phase(mut self, phase: &'static str) -> Self {
        self.gate = Gate::Phase(phase);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    /// Own cleanup that stays pending for `pending_passes` teardown passes
    pub fn with_cleanup(mut self, pending_passes: u32) -> Self {
        self.cleanup = Some(AtomicU32::new(pending_passes));
        self
    }

    pub fn watching<T: Resource<DynamicType = ()>>(mut self) -> Self {
        self.watches.push(watch::<T>());
        self
    }
}

#[async_trait]
impl Component<Widget> for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch_types(&self) -> Vec<ApiResource> {
        self.watches.clone()
    }

    fn is_reconcilable(&self, ctx: &ComponentContext<Widget>) -> bool {
        match self.gate {
            Gate::Open => true,
            Gate::Closed => false,
            Gate::Phase(phase) => ctx
                .instance()
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                == Some(phase),
        }
    }

    async fn reconcile(&self, _ctx: &mut ComponentContext<Widget>) -> Result<ComponentResult<Widget>> {
        self.log.lock().push(self.name.clone());
        match self.step {
            Step::Noop => Ok(ComponentResult::done()),
            Step::Fail => Err(Error::External {
                service: "script".into(),
                reason: "boom".into(),
            }),
            Step::RequeueNow => Ok(ComponentResult::requeue_now()),
            Step::RequeueAfter(delay) => Ok(ComponentResult::requeue_after(delay)),
            Step::SetPhase(phase) => Ok(ComponentResult::<Widget>::done().with_status(move |s: &mut WidgetStatus| {
                s.phase = Some(phase.to_string());
                Ok(())
            })),
            Step::SetStatus(label) => Ok(ComponentResult::<Widget>::done().with_status(move |s: &mut WidgetStatus| {
                s.set_status(label);
                Ok(())
            })),
        }
    }

    fn owns_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    async fn finalize(&self, _ctx: &mut ComponentContext<Widget>) -> Result<Cleanup> {
        self.log.lock().push(format!("finalize:{}", self.name));
        let Some(remaining) = &self.cleanup else {
            return Ok(Cleanup::Complete);
        };
        let left = remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(Cleanup::Complete);
        }
        remaining.store(left - 1, Ordering::SeqCst);
        Ok(Cleanup::Pending(format!("{} passes left", left)))
    }
}
