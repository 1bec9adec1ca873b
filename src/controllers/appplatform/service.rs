//! Templated Service in front of the Deployment

use super::{merge_labels, merge_list};
use crate::crd::AppPlatform;
use crate::engine::{watch, Component, ComponentContext, ComponentResult};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::api::ApiResource;

pub const SERVICE_TEMPLATE: &str = "appplatform/service.yml.j2";

pub struct AppService {
    port: i32,
}

impl AppService {
    pub fn new(port: i32) -> Self {
        Self { port }
    }
}

fn merge_service(desired: &Service, live: &mut Service) {
    merge_labels(&desired.metadata, &mut live.metadata);
    match (desired.spec.as_ref(), live.spec.as_mut()) {
        (Some(want), Some(have)) => {
            have.selector = want.selector.clone();
            have.ports = want
                .ports
                .as_ref()
                .map(|ports| merge_list(ports.as_slice(), have.ports.take().unwrap_or_default(), port_key, merge_port));
        }
        _ => live.spec = desired.spec.clone(),
    }
}

fn port_key(port: &ServicePort) -> (Option<String>, i32) {
    match &port.name {
        Some(name) => (Some(name.clone()), 0),
        None => (None, port.port),
    }
}

/// Copy the port numbers, leaving `protocol` and `nodePort` to the server
fn merge_port(want: &ServicePort, have: &mut ServicePort) {
    have.name = want.name.clone();
    have.port = want.port;
    have.target_port = want.target_port.clone();
    if want.protocol.is_some() {
        have.protocol = want.protocol.clone();
    }
}

#[async_trait]
impl Component<AppPlatform> for AppService {
    fn name(&self) -> &str {
        "service"
    }

    fn watch_types(&self) -> Vec<ApiResource> {
        vec![watch::<Service>()]
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<AppPlatform>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<AppPlatform>) -> Result<ComponentResult<AppPlatform>> {
        let extra = serde_json::json!({ "port": self.port });
        ctx.apply_template::<Service, _>(SERVICE_TEMPLATE, &extra, merge_service)
            .await?;
        Ok(ComponentResult::done())
    }
}
