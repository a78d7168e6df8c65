//! The slave's connection to the master, as seen by the sync engine.
//!
//! Three calls, matching the relay's RPC surface:
//!
//! | Call       | Shape                                        |
//! |------------|----------------------------------------------|
//! | `register` | long-lived; yields an [`InboundStream`]      |
//! | `report`   | unary; acknowledged before fan-out finishes  |
//! | `ping`     | unary heartbeat                              |

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use clipsync_core::FrameError;
use thiserror::Error;

/// Errors from talking to the master.
#[derive(Debug, Error)]
pub enum LinkError {
    /// TCP connection to the master failed.
    #[error("failed to connect to master at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a frame failed.
    #[error("master link error: {0}")]
    Frame(#[from] FrameError),

    /// The master did not answer in time.
    #[error("master did not answer within {0:?}")]
    Timeout(Duration),

    /// The master answered with an `Error` frame.
    #[error("master rejected the call: {0}")]
    Rejected(String),

    /// The master answered with a frame that does not fit the call.
    #[error("unexpected {0} reply from master")]
    UnexpectedReply(&'static str),

    /// The master closed the connection before replying.
    #[error("master closed the connection")]
    Closed,
}

/// The receiving end of a registered session.
#[async_trait]
pub trait InboundStream: Send {
    /// Waits for the next payload pushed by the master.
    ///
    /// Returns `Ok(None)` once the session has ended.
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

/// Calls a slave makes against the master.
#[async_trait]
pub trait MasterLink: Send + Sync {
    /// Opens a session for `address` and returns its payload stream.
    async fn register(&self, address: &str) -> Result<Box<dyn InboundStream>, LinkError>;

    /// Submits local clipboard content for fan-out.
    async fn report(&self, content: &[u8], address: &str) -> Result<(), LinkError>;

    /// Heartbeat for `address`.
    async fn ping(&self, address: &str) -> Result<(), LinkError>;
}
