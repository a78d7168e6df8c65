//! Clipboard adapters implementing
//! [`ClipboardCapability`](crate::application::clipboard::ClipboardCapability).
//!
//! - **`system`** – The OS text clipboard via `arboard`, polled on a
//!   dedicated thread.
//! - **`memory`** – An in-memory clipboard for tests and headless demos.

pub mod memory;
pub mod system;

pub use memory::MemoryClipboard;
pub use system::{SystemClipboard, DEFAULT_POLL_INTERVAL};
