//! Network infrastructure for the relay.
//!
//! # Sub-modules
//!
//! - **`server`** – Accepts TCP connections, tells session streams apart
//!   from unary call channels by their first frame, and serves both.

pub mod server;

pub use server::{NetworkError, RelayServer, TcpPayloadSink};
