//! Rollout domain: descriptors become container specs, accessories are
//! brought up and polled before the services that need them, and routes are
//! registered on the shared ingress.
//! - Hosts are reached only through [`runtime::ContainerRuntime`].
//! - The ingress is reached only through [`registry::RouteRegistry`].

pub mod container;
pub mod dns;
pub mod errors;
pub mod lock;
pub mod operations;
pub mod readiness;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod runtime;
pub mod secrets;
pub mod sequencer;
pub mod storage;
#[cfg(test)]
pub mod test_support;

pub use errors::DeployError;
pub use sequencer::{Deployer, RolloutFailure, RolloutReport};
