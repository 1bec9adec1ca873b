//! Fills in spec defaults on the working copy

use crate::crd::RabbitmqUser;
use crate::engine::{ComponentContext, Component, ComponentResult};
use crate::error::Result;
use async_trait::async_trait;

pub const DEFAULT_VHOST: &str = "/";
pub const DEFAULT_PATTERN: &str = ".*";

pub struct Defaults;

#[async_trait]
impl Component<RabbitmqUser> for Defaults {
    fn name(&self) -> &str {
        "defaults"
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<RabbitmqUser>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<RabbitmqUser>) -> Result<ComponentResult<RabbitmqUser>> {
        let name = ctx.name();
        let spec = &mut ctx.instance_mut().spec;

        if spec.username.as_deref().map_or(true, str::is_empty) {
            spec.username = Some(name);
        }
        for permission in &mut spec.permissions {
            if permission.vhost.is_empty() {
                permission.vhost = DEFAULT_VHOST.to_string();
            }
            for pattern in [&mut permission.configure, &mut permission.write, &mut permission.read] {
                if pattern.is_empty() {
                    *pattern = DEFAULT_PATTERN.to_string();
                }
            }
        }

        Ok(ComponentResult::done())
    }
}
