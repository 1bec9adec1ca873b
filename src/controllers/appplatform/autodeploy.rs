//! Tracks the newest build of a branch
//!
//! Build tags look like `<build>-<sha>-<branch>`, where `<build>` is a
//! monotonically increasing number. The chosen tag becomes `spec.version`
//! on the working copy for the rest of the pass.

use crate::crd::AppPlatform;
use crate::domain::TagCache;
use crate::engine::{Component, ComponentContext, ComponentResult};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct AutoDeploy {
    tags: Arc<TagCache>,
    poll_interval: Duration,
}

impl AutoDeploy {
    pub fn new(tags: Arc<TagCache>, poll_interval: Duration) -> Self {
        Self { tags, poll_interval }
    }
}

/// Build number of `tag` if it was built from `branch`
fn build_number(tag: &str, branch: &str) -> Option<u64> {
    let mut parts = tag.splitn(3, '-');
    let build = parts.next()?.parse().ok()?;
    let sha = parts.next()?;
    let tag_branch = parts.next()?;
    (!sha.is_empty() && tag_branch == branch).then_some(build)
}

/// Newest tag built from `branch`
pub fn newest_build<'a>(tags: &'a [String], branch: &str) -> Option<&'a str> {
    tags.iter()
        .filter_map(|tag| build_number(tag, branch).map(|build| (build, tag)))
        .max_by_key(|(build, _)| *build)
        .map(|(_, tag)| tag.as_str())
}

/// Repository path of an image reference, without the registry host
pub fn repository_path(image: &str) -> &str {
    match image.split_once('/') {
        Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => rest,
        _ => image,
    }
}

#[async_trait]
impl Component<AppPlatform> for AutoDeploy {
    fn name(&self) -> &str {
        "autodeploy"
    }

    fn is_reconcilable(&self, _ctx: &ComponentContext<AppPlatform>) -> bool {
        true
    }

    async fn reconcile(&self, ctx: &mut ComponentContext<AppPlatform>) -> Result<ComponentResult<AppPlatform>> {
        let branch = match ctx.instance().spec.auto_deploy.as_deref() {
            Some(branch) if !branch.is_empty() => branch.to_string(),
            _ => return Ok(ComponentResult::done()),
        };
        let image = ctx
            .instance()
            .spec
            .image
            .clone()
            .ok_or_else(|| Error::InvalidSpec("autoDeploy needs an image".to_string()))?;

        let tags = ctx.guard(self.tags.tags(repository_path(&image))).await?;
        let newest = newest_build(&tags, &branch)
            .ok_or_else(|| Error::NoMatchingImage { branch: branch.clone() })?
            .to_string();

        let spec = &mut ctx.instance_mut().spec;
        if spec.version.as_deref() != Some(newest.as_str()) {
            info!("Branch {} resolved to {}", branch, newest);
            spec.version = Some(newest);
        }

        Ok(ComponentResult::requeue_after(self.poll_interval))
    }
}
