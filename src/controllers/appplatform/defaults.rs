//! Fills in image and replica defaults on the working copy

use crate::crd::AppPlatform;
use crate::engine::{Component, ComponentContext, ComponentResult};
use crate::error::Result;
use async_trait::async_trait;

pub struct Defaults {
    image: String,
    replicas: i32,
}

impl Defaults {
    pub fn new(image: impl Into<String>, replicas: i32) -> Self {
        Self {
            image: image.into(),
            replicas,
        }
    }
}

#[async_trait]
impl Component<AppPlatform> for Defaults {
    fn name(&self) -> &str {
        "defaults"
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<AppPlatform>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<AppPlatform>) -> Result<ComponentResult<AppPlatform>> {
        let spec = &mut ctx.instance_mut().spec;
        if spec.image.as_deref().map_or(true, str::is_empty) && !self.image.is_empty() {
            spec.image = Some(self.image.clone());
        }
        spec.replicas.get_or_insert(self.replicas);
        Ok(ComponentResult::done())
    }
}
