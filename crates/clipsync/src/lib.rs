//! clipsync library entry point.
//!
//! The binary in `main.rs` is a thin shell over these modules so that the
//! bootstrap can be exercised from integration tests.
//!
//! - **`cli`** – `clap` arguments and role selection.
//! - **`config`** – the TOML config file and its conversion into the
//!   runtime configs of `clipsync-master` and `clipsync-slave`.
//! - **`runtime`** – wiring for a master relay or a slave engine.

pub mod cli;
pub mod config;
pub mod runtime;
