//! Waits for the password Secret

use crate::crd::RabbitmqUser;
use crate::engine::{watch, Component, ComponentContext, ComponentResult, Instance, STATUS_READY};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ApiResource;
use tracing::info;

/// Key holding the password inside the Secret
pub const PASSWORD_KEY: &str = "password";
pub const CREDENTIALS_MISSING: &str = "Missing";

pub struct Credentials;

/// Password from the Instance's password Secret, `None` while it is absent
pub async fn read_password(ctx: &ComponentContext<RabbitmqUser>) -> Result<Option<String>> {
    let secret_name = &ctx.instance().spec.password_secret;
    if secret_name.is_empty() {
        return Err(Error::InvalidSpec("passwordSecret is required".to_string()));
    }

    let secret = match ctx.get::<Secret>(secret_name).await? {
        Some(secret) => secret,
        None => return Ok(None),
    };
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(PASSWORD_KEY))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
    let from_string_data = secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(PASSWORD_KEY))
        .cloned();

    Ok(from_data.or(from_string_data))
}

#[async_trait]
impl Component<RabbitmqUser> for Credentials {
    fn name(&self) -> &str {
        "credentials"
    }

    fn watch_types(&self) -> Vec<ApiResource> {
        vec![watch::<Secret>()]
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<RabbitmqUser>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<RabbitmqUser>) -> Result<ComponentResult<RabbitmqUser>> {
        let found = read_password(ctx).await?.is_some();

        // The user stage gates on this in the same pass
        let status = ctx.instance_mut().status_mut();
        if found {
            status.credentials_status = STATUS_READY.to_string();
            return Ok(ComponentResult::done());
        }

        if status.credentials_status != CREDENTIALS_MISSING {
            info!(
                "Password secret {} not found yet",
                ctx.instance().spec.password_secret
            );
        }
        ctx.instance_mut().status_mut().credentials_status = CREDENTIALS_MISSING.to_string();
        Ok(ComponentResult::requeue_now())
    }
}
