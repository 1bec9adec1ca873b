//! Reference pipelines built on the engine
//!
//! - [`rabbitmquser`]: Broker users with external cleanup
//! - [`appplatform`]: Templated application workloads

pub mod appplatform;
pub mod rabbitmquser;
