//! Application layer for the slave.
//!
//! - **`clipboard`**   – The [`clipboard::ClipboardCapability`] trait: write
//!   content, watch for local changes.
//! - **`master_link`** – The [`master_link::MasterLink`] trait: the three
//!   calls a slave makes against the master.
//! - **`sync_engine`** – Runs one session at a time: the receive loop and
//!   the send loop, joined, with reconnect around them.

pub mod clipboard;
pub mod master_link;
pub mod sync_engine;
