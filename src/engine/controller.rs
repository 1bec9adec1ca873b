//! Component Controller
//!
//! Binds a [`Pipeline`] to the controller runtime. One call to
//! [`ComponentController::reconcile_instance`] is one invocation: decide the
//! lifecycle state, run the normal or teardown pipeline, write the status
//! once if it changed, and pick the next-invocation directive.

use crate::engine::context::ComponentContext;
use crate::engine::driver::Pipeline;
use crate::engine::finalizer::{
    add_finalizer, has_finalizer, lifecycle, pending_message, remove_finalizer, LifecycleState,
    TeardownTracker,
};
use crate::engine::instance::{Instance, InstanceStatus, ObjectKey, STATUS_DELETING, STATUS_ERROR};
use crate::engine::requeue::{BackoffTracker, Requeue, RequeueConfig};
use crate::engine::store::{api_resource, from_dynamic, to_dynamic, ObjectStoreRef};
use crate::engine::templates::TemplateRendererRef;
use crate::error::{Error, Result};
use crate::metrics::{EngineMetrics, RESULT_BLOCKED, RESULT_ERROR, RESULT_SUCCESS, RESULT_TEARDOWN};
use futures::StreamExt;
use kube::api::{Api, DynamicObject, ListParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Per-controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Intercept deletion with a finalizer when the pipeline owns cleanup
    pub finalizers_enabled: bool,
    /// Deadline for one invocation
    pub reconcile_timeout: Option<Duration>,
    /// Requeue timing
    pub requeue: RequeueConfig,
    /// Teardown passes before the Instance is flagged as stalled
    pub max_teardown_attempts: u32,
    /// Delay between teardown passes while cleanup is pending
    pub teardown_interval: Duration,
    /// Restrict watches to one namespace
    pub namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            finalizers_enabled: true,
            reconcile_timeout: Some(Duration::from_secs(60)),
            requeue: RequeueConfig::default(),
            max_teardown_attempts: 10,
            teardown_interval: Duration::from_secs(10),
            namespace: None,
        }
    }
}

/// Description of a registered controller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerInfo {
    pub name: String,
    pub kind: String,
    pub api_version: String,
    pub stages: Vec<String>,
    pub watches: Vec<String>,
    pub finalizer: Option<String>,
}

/// Runs one Instance kind's pipeline
pub struct ComponentController<K: Instance> {
    name: String,
    pipeline: Pipeline<K>,
    store: ObjectStoreRef,
    templates: Option<TemplateRendererRef>,
    config: ControllerConfig,
    metrics: Option<Arc<EngineMetrics>>,
    backoff: BackoffTracker,
    teardown: TeardownTracker,
    shutdown: CancellationToken,
}

impl<K: Instance> ComponentController<K> {
    pub fn new(
        name: impl Into<String>,
        pipeline: Pipeline<K>,
        store: ObjectStoreRef,
        config: ControllerConfig,
    ) -> Self {
        let backoff = BackoffTracker::new(&config.requeue);
        Self {
            name: name.into(),
            pipeline,
            store,
            templates: None,
            config,
            metrics: None,
            backoff,
            teardown: TeardownTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_templates(mut self, templates: TemplateRendererRef) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cancel in-flight invocations and stop the runtime when `token` fires
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Pipeline<K> {
        &self.pipeline
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Finalizer token owned by this controller
    pub fn finalizer_name(&self) -> String {
        format!("{}.finalizer", self.name)
    }

    /// Token used to intercept deletion, `None` when deletion passes through
    pub fn finalizer(&self) -> Option<String> {
        (self.config.finalizers_enabled && self.pipeline.has_cleanup()).then(|| self.finalizer_name())
    }

    pub fn info(&self) -> ControllerInfo {
        ControllerInfo {
            name: self.name.clone(),
            kind: K::kind(&()).to_string(),
            api_version: K::api_version(&()).to_string(),
            stages: self.pipeline.stage_names(),
            watches: self
                .pipeline
                .watch_types()
                .iter()
                .map(|ar| format!("{}/{}", ar.api_version, ar.kind))
                .collect(),
            finalizer: self.finalizer(),
        }
    }

    fn context(&self, instance: K) -> ComponentContext<K> {
        let mut ctx = ComponentContext::new(instance, self.store.clone())
            .with_cancellation(self.shutdown.child_token());
        if let Some(templates) = &self.templates {
            ctx = ctx.with_templates(templates.clone());
        }
        if let Some(timeout) = self.config.reconcile_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        ctx
    }

    fn observe(&self, result: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_reconcile(&self.name, result, started.elapsed().as_secs_f64());
        }
    }

    fn observe_stage_error(&self, err: &Error) {
        if let (Some(metrics), Some(stage)) = (&self.metrics, err.stage()) {
            metrics.stage_error(&self.name, stage);
        }
    }

    // =========================================================================
    // Store Writes
    // =========================================================================

    async fn update_instance(&self, instance: &K) -> Result<K> {
        let updated = self
            .store
            .update(&api_resource::<K>(), &to_dynamic(instance)?)
            .await?;
        from_dynamic(updated)
    }

    async fn write_status(&self, instance: &K) -> Result<K> {
        let updated = self
            .store
            .update_status(&api_resource::<K>(), &to_dynamic(instance)?)
            .await?;
        from_dynamic(updated)
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Run one invocation for `instance`
    pub async fn reconcile_instance(&self, instance: &K) -> Result<Requeue> {
        let key = ObjectKey::of(instance);
        let span = info_span!(
            "reconcile",
            controller = %self.name,
            namespace = %key.namespace.as_deref().unwrap_or(""),
            name = %key.name,
        );
        self.invoke(instance, &key).instrument(span).await
    }

    async fn invoke(&self, instance: &K, key: &ObjectKey) -> Result<Requeue> {
        let started = Instant::now();
        let token = self.finalizer();

        match lifecycle(instance, token.as_deref()) {
            LifecycleState::Active => {
                let result = self.converge(instance, key).await;
                match &result {
                    Ok((_, true)) => self.observe(RESULT_BLOCKED, started),
                    Ok((_, false)) => self.observe(RESULT_SUCCESS, started),
                    Err(_) => self.observe(RESULT_ERROR, started),
                }
                result.map(|(requeue, _)| requeue)
            }
            LifecycleState::Deleting => {
                let result = self.tear_down(instance, key).await;
                self.observe(RESULT_TEARDOWN, started);
                if let Some(metrics) = &self.metrics {
                    metrics.set_cleanup_pending(&self.name, self.teardown.pending());
                }
                result
            }
            LifecycleState::Released => {
                debug!("Instance released, nothing to do");
                // A token left behind while finalizers were disabled would block deletion
                let name = self.finalizer_name();
                if token.is_none() && has_finalizer(instance, &name) {
                    let mut released = instance.clone();
                    remove_finalizer(&mut released, &name);
                    self.update_instance(&released).await?;
                    info!("Removed stale finalizer {}", name);
                }
                self.forget(key);
                Ok(Requeue::AwaitChange)
            }
        }
    }

    /// Drop the per-Instance retry state once it is gone for good
    fn forget(&self, key: &ObjectKey) {
        self.teardown.clear(key);
        self.backoff.reset(key);
    }

    /// Normal path: ensure the finalizer, run the pipeline, write status.
    ///
    /// The flag is set when a gate stopped the pass.
    async fn converge(&self, instance: &K, key: &ObjectKey) -> Result<(Requeue, bool)> {
        let mut instance = instance.clone();
        if let Some(token) = self.finalizer() {
            if add_finalizer(&mut instance, &token) {
                instance = self.update_instance(&instance).await?;
                info!("Added finalizer {}", token);
            }
        }

        let original = instance.status().cloned();
        let mut ctx = self.context(instance);
        let outcome = self.pipeline.reconcile(&mut ctx).await;
        let instance = ctx.into_instance();

        if instance.status() != original.as_ref() {
            self.write_status(&instance).await?;
            debug!("Status written: {:?}", instance.status().map(|s| s.status()));
        }

        if let Some(err) = outcome.error {
            self.observe_stage_error(&err);
            return Err(err);
        }

        self.backoff.reset(key);
        let requeue = outcome.requeue();
        match &outcome.blocked_on {
            Some(stage) => debug!("Pass blocked on {}, ran {:?}", stage, outcome.ran),
            None => debug!("Pass complete, ran {:?}, next {:?}", outcome.ran, requeue),
        }
        Ok((requeue, outcome.blocked_on.is_some()))
    }

    /// Deletion path: run teardown, release the finalizer once complete
    async fn tear_down(&self, instance: &K, key: &ObjectKey) -> Result<Requeue> {
        let original = instance.status().cloned();
        let mut ctx = self.context(instance.clone());
        let outcome = self.pipeline.teardown(&mut ctx).await;
        let mut instance = ctx.into_instance();

        if outcome.is_complete() {
            if instance.status() != original.as_ref() {
                instance = self.write_status(&instance).await?;
            }
            let token = self.finalizer_name();
            remove_finalizer(&mut instance, &token);
            self.update_instance(&instance).await?;
            self.forget(key);
            info!("Cleanup complete for {}, finalizer {} removed", instance.name_any(), token);
            return Ok(Requeue::AwaitChange);
        }

        let attempt = self.teardown.record(key);
        let max = self.config.max_teardown_attempts;
        {
            let status = instance.status_mut();
            match &outcome.error {
                Some(err) => {
                    status.set_status(STATUS_ERROR);
                    status.set_message(&err.to_string());
                }
                None => {
                    let message = pending_message(&outcome.pending, attempt, max);
                    if attempt >= max {
                        warn!("{}", message);
                        status.set_status(STATUS_ERROR);
                    } else {
                        status.set_status(STATUS_DELETING);
                    }
                    status.set_message(&message);
                }
            }
        }
        if instance.status() != original.as_ref() {
            self.write_status(&instance).await?;
        }

        if let Some(err) = outcome.error {
            self.observe_stage_error(&err);
            return Err(err);
        }
        Ok(Requeue::After(self.config.teardown_interval))
    }

    /// Delay before retrying a failed invocation
    pub fn retry_delay(&self, key: &ObjectKey, err: &Error) -> Duration {
        let delay = self.backoff.next_delay(key);
        warn!(
            controller = %self.name,
            "Reconcile of {} failed: {} (hint {:?}, retry in {:?})",
            key,
            err,
            err.action(),
            delay
        );
        delay
    }

    // =========================================================================
    // Runtime
    // =========================================================================

    /// Watch the Instance kind and every declared child kind until shutdown
    pub async fn run(self: Arc<Self>, client: Client) -> Result<()> {
        let api: Api<K> = match &self.config.namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };

        // Fail fast when the CRD is not installed
        if let Err(e) = api.list(&ListParams::default().limit(1)).await {
            error!("{} CRD is not queryable: {}", K::kind(&()), e);
            return Err(Error::Kube(e));
        }

        let mut controller = Controller::new(api, watcher::Config::default());
        for ar in self.pipeline.watch_types() {
            let children: Api<DynamicObject> = match &self.config.namespace {
                Some(ns) => Api::namespaced_with(client.clone(), ns, ar),
                None => Api::all_with(client.clone(), ar),
            };
            controller = controller.owns_with(children, ar.clone(), watcher::Config::default());
        }

        info!(
            "Starting controller {} ({} stages, watching {:?})",
            self.name,
            self.pipeline.len(),
            self.info().watches
        );

        let shutdown = self.shutdown.clone();
        let name = self.name.clone();
        controller
            .graceful_shutdown_on(async move { shutdown.cancelled().await })
            .run(reconcile::<K>, error_policy::<K>, self)
            .for_each(|res| {
                let name = name.clone();
                async move {
                    match res {
                        Ok((obj, _)) => debug!(controller = %name, "Reconciled {}", obj),
                        Err(e) => warn!(controller = %name, "Reconcile failed: {}", e),
                    }
                }
            })
            .await;

        info!("Controller {} stopped", name);
        Ok(())
    }
}

async fn reconcile<K: Instance>(instance: Arc<K>, ctrl: Arc<ComponentController<K>>) -> Result<Action> {
    let requeue = ctrl.reconcile_instance(&instance).await?;
    Ok(requeue.into_action(&ctrl.config.requeue))
}

fn error_policy<K: Instance>(instance: Arc<K>, err: &Error, ctrl: Arc<ComponentController<K>>) -> Action {
    let key = ObjectKey::of(instance.as_ref());
    Action::requeue(ctrl.retry_delay(&key, err))
}
