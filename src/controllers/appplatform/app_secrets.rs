//! Merges the listed input Secrets into `<name>.app-secrets`

use crate::crd::AppPlatform;
use crate::engine::{watch, Component, ComponentContext, ComponentResult, Instance, STATUS_READY};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{ApiResource, ObjectMeta};
use std::collections::BTreeMap;
use tracing::info;

pub const SECRETS_WAITING: &str = "Waiting";

pub struct AppSecrets;

/// Merge `data` and `stringData` of `secrets` in order, later keys win
pub fn merge_secret_data(secrets: &[Secret]) -> BTreeMap<String, ByteString> {
    let mut merged = BTreeMap::new();
    for secret in secrets {
        if let Some(data) = &secret.data {
            merged.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(data) = &secret.string_data {
            merged.extend(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec()))),
            );
        }
    }
    merged
}

#[async_trait]
impl Component<AppPlatform> for AppSecrets {
    fn name(&self) -> &str {
        "app-secrets"
    }

    fn watch_types(&self) -> Vec<ApiResource> {
        vec![watch::<Secret>()]
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<AppPlatform>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<AppPlatform>) -> Result<ComponentResult<AppPlatform>> {
        let mut inputs = Vec::new();
        let mut missing = Vec::new();
        for name in &ctx.instance().spec.secrets {
            match ctx.get::<Secret>(name).await? {
                Some(secret) => inputs.push(secret),
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            info!("Waiting for input secrets: {}", missing.join(", "));
            ctx.instance_mut().status_mut().app_secrets_status = SECRETS_WAITING.to_string();
            return Ok(ComponentResult::requeue_now());
        }

        let desired = Secret {
            metadata: ObjectMeta {
                name: Some(ctx.instance().app_secrets_name()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(merge_secret_data(&inputs)),
            ..Default::default()
        };
        ctx.create_or_update(desired, |desired, live| {
            live.data = desired.data.clone();
        })
        .await?;

        // The deployment stage gates on this in the same pass
        ctx.instance_mut().status_mut().app_secrets_status = STATUS_READY.to_string();
        Ok(ComponentResult::done())
    }
}
