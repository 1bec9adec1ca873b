//! Converges per-vhost permissions

use crate::crd::RabbitmqUser;
use crate::domain::{BrokerPermissions, RabbitmqAdminRef};
use crate::engine::{Component, ComponentContext, ComponentResult};
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

pub struct Permissions {
    admin: RabbitmqAdminRef,
}

impl Permissions {
    pub fn new(admin: RabbitmqAdminRef) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl Component<RabbitmqUser> for Permissions {
    fn name(&self) -> &str {
        "permissions"
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<RabbitmqUser>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<RabbitmqUser>) -> Result<ComponentResult<RabbitmqUser>> {
        let username = ctx.instance().username();

        for permission in &ctx.instance().spec.permissions {
            let desired = BrokerPermissions {
                configure: permission.configure.clone(),
                write: permission.write.clone(),
                read: permission.read.clone(),
            };
            let live = ctx
                .guard(self.admin.get_permissions(&permission.vhost, &username))
                .await?;
            if live.as_ref() != Some(&desired) {
                ctx.guard(self.admin.put_permissions(&permission.vhost, &username, &desired))
                    .await?;
                info!("Set permissions of {} on vhost {}", username, permission.vhost);
            }
        }

        Ok(ComponentResult::done())
    }
}
