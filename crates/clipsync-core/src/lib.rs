//! # clipsync-core
//!
//! Shared library for ClipSync containing the wire protocol, the async frame
//! reader/writer, and the liveness primitives used by the master relay.
//!
//! This crate is used by both the master and the slave.  It has no
//! dependency on sockets or the OS clipboard: framing is written against
//! `AsyncRead`/`AsyncWrite`, so any byte stream works.
//!
//! # Architecture overview (for beginners)
//!
//! ClipSync keeps clipboards in sync across machines.  One process runs as
//! the *master* (a relay); every other machine runs a *slave* that registers
//! with the master, reports local clipboard changes, and applies changes that
//! other slaves reported.
//!
//! - **`protocol`** – How bytes travel over the network.  Messages are encoded
//!   into a compact binary format (24-byte header + payload) and decoded back
//!   into typed Rust values on the other end.
//!
//! - **`domain`** – Pure bookkeeping with no I/O.  The important pieces are
//!   the [`TtlRegistry`] (an address-keyed map whose entries expire unless
//!   they are refreshed) and the [`CloseSignal`] that ties the lifetime of a
//!   master-side session to the RPC call that created it.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `clipsync_core::TtlRegistry` instead of the full module path.
pub use domain::close_signal::{CloseReason, CloseSignal};
pub use domain::ttl_registry::{TtlEntry, TtlRegistry};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::framing::{read_message, write_message, FrameError};
pub use protocol::messages::SyncMessage;
