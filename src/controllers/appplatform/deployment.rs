//! Templated Deployment and its rollout state

use super::{merge_labels, merge_list};
use crate::crd::AppPlatform;
use crate::engine::{watch, Component, ComponentContext, ComponentResult, InstanceStatus, STATUS_READY};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ContainerPort;
use kube::api::ApiResource;
use std::time::Duration;

pub const DEPLOYMENT_TEMPLATE: &str = "appplatform/deployment.yml.j2";
pub const DEPLOYING: &str = "Deploying";

pub struct Workload {
    port: i32,
    rollout_poll: Duration,
}

impl Workload {
    pub fn new(port: i32, rollout_poll: Duration) -> Self {
        Self { port, rollout_poll }
    }
}

/// Copy the fields the template owns onto the live Deployment
fn merge_deployment(desired: &Deployment, live: &mut Deployment) {
    merge_labels(&desired.metadata, &mut live.metadata);

    let (want, have) = match (desired.spec.as_ref(), live.spec.as_mut()) {
        (Some(want), Some(have)) => (want, have),
        _ => {
            live.spec = desired.spec.clone();
            return;
        }
    };
    have.replicas = want.replicas;

    let mut template_meta = have.template.metadata.take().unwrap_or_default();
    if let Some(want_meta) = &want.template.metadata {
        merge_labels(want_meta, &mut template_meta);
    }
    have.template.metadata = Some(template_meta);

    let want_pod = match want.template.spec.as_ref() {
        Some(pod) => pod,
        None => return,
    };
    let have_pod = have.template.spec.get_or_insert_with(Default::default);
    for container in &want_pod.containers {
        match have_pod.containers.iter_mut().find(|c| c.name == container.name) {
            Some(existing) => {
                existing.image = container.image.clone();
                existing.ports = container
                    .ports
                    .as_ref()
                    .map(|want| merge_list(want.as_slice(), existing.ports.take().unwrap_or_default(), port_key, merge_port));
                existing.env = container.env.clone();
                existing.env_from = container.env_from.clone();
            }
            None => have_pod.containers.push(container.clone()),
        }
    }
}

fn port_key(port: &ContainerPort) -> (Option<String>, i32) {
    match &port.name {
        Some(name) => (Some(name.clone()), 0),
        None => (None, port.container_port),
    }
}

fn merge_port(want: &ContainerPort, have: &mut ContainerPort) {
    have.name = want.name.clone();
    have.container_port = want.container_port;
    if want.protocol.is_some() {
        have.protocol = want.protocol.clone();
    }
}

#[async_trait]
impl Component<AppPlatform> for Workload {
    fn name(&self) -> &str {
        "deployment"
    }

    fn watch_types(&self) -> Vec<ApiResource> {
        vec![watch::<Deployment>()]
    }

    fn is_reconcilable(&self, ctx: &ComponentContext<AppPlatform>) -> bool {
        let app = ctx.instance();
        app.spec.version.is_some() && app.app_secrets_ready()
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<AppPlatform>) -> Result<ComponentResult<AppPlatform>> {
        let image = ctx
            .instance()
            .image_ref()
            .ok_or_else(|| Error::InvalidSpec("no image repository configured".to_string()))?;
        let extra = serde_json::json!({
            "image": image,
            "appSecrets": ctx.instance().app_secrets_name(),
            "port": self.port,
        });

        let (outcome, live) = ctx
            .apply_template::<Deployment, _>(DEPLOYMENT_TEMPLATE, &extra, merge_deployment)
            .await?;

        let wanted = live.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = live
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        if !outcome.applied() && ready >= wanted {
            return Ok(ComponentResult::<AppPlatform>::done().with_status(|status| {
                status.deployment_status = STATUS_READY.to_string();
                if status.status() == DEPLOYING {
                    status.set_message("");
                }
                Ok(())
            }));
        }

        Ok(ComponentResult::<AppPlatform>::requeue_after(self.rollout_poll).with_status(move |status| {
            status.deployment_status = DEPLOYING.to_string();
            status.set_status(DEPLOYING);
            status.set_message(&format!("{}/{} replicas ready", ready, wanted));
            Ok(())
        }))
    }
}
