//! Custom Resource Definitions driven by the reference pipelines
//!
//! - RabbitmqUser: A broker user with tags and vhost permissions
//! - AppPlatform: A deployed application with merged secrets

pub mod app_platform;
pub mod rabbitmq_user;

pub use app_platform::*;
pub use rabbitmq_user::*;

use crate::error::Result;
use kube::CustomResourceExt;

/// All CRDs as one multi-document YAML stream
pub fn crds_yaml() -> Result<String> {
    let docs = [
        serde_yaml::to_string(&RabbitmqUser::crd())?,
        serde_yaml::to_string(&AppPlatform::crd())?,
    ];
    Ok(docs.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crds_yaml() {
        let yaml = crds_yaml().unwrap();
        assert!(yaml.contains("name: rabbitmqusers.db.operator.dev"));
        assert!(yaml.contains("name: appplatforms.apps.operator.dev"));
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}
