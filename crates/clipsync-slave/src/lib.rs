//! clipsync-slave library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `clipsync` binary share the same module tree.
//!
//! # What does a slave do? (for beginners)
//!
//! A *slave* is one machine taking part in clipboard sync.  It:
//!
//! 1. Registers its advertised address with the master and keeps the
//!    resulting session stream open.
//! 2. Watches the local clipboard and reports every change to the master.
//! 3. Applies every payload the master pushes down the session stream to the
//!    local clipboard.
//! 4. Pings the master periodically so its session does not expire, and
//!    re-registers whenever the stream ends.

/// Application layer: the sync engine and the abstractions it runs against.
pub mod application;

/// Infrastructure layer: TCP master link and clipboard adapters.
pub mod infrastructure;
