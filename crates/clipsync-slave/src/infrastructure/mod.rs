//! Infrastructure layer for the slave.
//!
//! Contains OS-facing adapters: the TCP link to the master and the
//! clipboard implementations.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `clipsync_core`, but MUST NOT be imported by the `application` layer.

pub mod clipboard;
pub mod network;
