//! RabbitmqUser pipeline
//!
//! `defaults` → `credentials` → `user` → `permissions`. The user stage owns
//! cleanup: the broker user is removed before the finalizer is released.

pub mod credentials;
pub mod defaults;
pub mod permissions;
pub mod user;

use crate::crd::RabbitmqUser;
use crate::domain::RabbitmqAdminRef;
use crate::engine::Pipeline;

pub use credentials::Credentials;
pub use defaults::Defaults;
pub use permissions::Permissions;
pub use user::User;

/// Controller name, also the finalizer prefix
pub const CONTROLLER_NAME: &str = "rabbitmquser";

pub fn pipeline(admin: RabbitmqAdminRef) -> Pipeline<RabbitmqUser> {
    Pipeline::new()
        .with(Defaults)
        .with(Credentials)
        .with(User::new(admin.clone()))
        .with(Permissions::new(admin))
}
