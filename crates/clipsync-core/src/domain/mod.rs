//! Liveness bookkeeping shared by the master registries.

pub mod close_signal;
pub mod ttl_registry;
