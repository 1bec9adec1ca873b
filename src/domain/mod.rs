//! Domain layer - Capability ports and their adapters
//!
//! Stages depend on the traits in [`ports`]; the HTTP adapters are wired in
//! by the binary.

pub mod ports;
pub mod rabbitmq;
pub mod registry;

pub use ports::*;
pub use rabbitmq::{RabbitmqConfig, RabbitmqHttpAdmin};
pub use registry::{RegistryTagFetcher, TagCache};
