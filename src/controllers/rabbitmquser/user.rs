//! Creates, retags and removes the broker user

use super::credentials::read_password;
use crate::crd::RabbitmqUser;
use crate::domain::{BrokerUserRequest, RabbitmqAdminRef};
use crate::engine::{Cleanup, Component, ComponentContext, ComponentResult, STATUS_READY};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::info;

pub struct User {
    admin: RabbitmqAdminRef,
}

impl User {
    pub fn new(admin: RabbitmqAdminRef) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl Component<RabbitmqUser> for User {
    fn name(&self) -> &str {
        "user"
    }

    fn is_reconcilable(&self, ctx: &ComponentContext<RabbitmqUser>) -> bool {
        ctx.instance()
            .status
            .as_ref()
            .map_or(false, |s| s.credentials_status == STATUS_READY)
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<RabbitmqUser>) -> Result<ComponentResult<RabbitmqUser>> {
        let username = ctx.instance().username();
        let tags = ctx.instance().tag_list();

        let live = ctx.guard(self.admin.get_user(&username)).await?;
        let needs_write = live.as_ref().map_or(true, |user| !user.has_tags(&tags));
        if needs_write {
            let password = read_password(ctx).await?.ok_or_else(|| Error::ResourceNotFound {
                kind: "Secret".to_string(),
                name: ctx.instance().spec.password_secret.clone(),
            })?;
            let request = BrokerUserRequest { password, tags };
            ctx.guard(self.admin.put_user(&username, &request)).await?;
            if live.is_none() {
                info!("Created broker user {}", username);
            } else {
                info!("Updated tags of broker user {}", username);
            }
        }

        Ok(ComponentResult::<RabbitmqUser>::done().with_status(|status| {
            status.user_status = STATUS_READY.to_string();
            Ok(())
        }))
    }

    fn owns_cleanup(&self) -> bool {
        true
    }

    async fn finalize(&self, ctx: &mut ComponentContext<RabbitmqUser>) -> Result<Cleanup> {
        let username = ctx.instance().username();
        if ctx.guard(self.admin.get_user(&username)).await?.is_none() {
            return Ok(Cleanup::Complete);
        }

        ctx.guard(self.admin.delete_user(&username)).await?;
        info!("Deleted broker user {}", username);

        match ctx.guard(self.admin.get_user(&username)).await? {
            None => Ok(Cleanup::Complete),
            Some(_) => Ok(Cleanup::Pending(format!("user {} still present", username))),
        }
    }
}
