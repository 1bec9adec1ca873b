//! API Module
//!
//! Health probes, Prometheus metrics and the controller listing.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
