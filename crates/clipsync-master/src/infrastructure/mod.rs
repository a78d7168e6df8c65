//! Infrastructure layer for the relay.
//!
//! Contains the OS-facing adapter: the TCP server that turns sockets into
//! calls on [`crate::application::relay_session::RelayService`].
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `clipsync_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
