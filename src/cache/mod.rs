//! The resource-cache engine: per-key state machines composed into per-family registries.

mod key_coordinator;
mod resource_coordinator;

pub use key_coordinator::KeyCoordinator;
pub use resource_coordinator::ResourceCoordinator;
