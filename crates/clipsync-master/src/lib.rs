//! clipsync-master library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `clipsync` binary share the same module tree.
//!
//! ```text
//!            ┌───────────────────── RelayService ─────────────────────┐
//! Register ─►│ MembershipRegistry.upsert ─► ConnectionRegistry.establish│─► wait on close signal
//! Report   ─►│ MembershipRegistry.touch  ─► fan-out worker ─► broadcast │
//! Ping     ─►│ ConnectionRegistry.refresh + MembershipRegistry.touch    │
//!            └──────────────────────────────────────────────────────────┘
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;

pub use config::RelayConfig;
