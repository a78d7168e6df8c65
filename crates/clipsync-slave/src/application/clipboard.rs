//! Clipboard capability: the slave's view of the local clipboard.
//!
//! The engine only needs two things from a clipboard:
//!
//! - **write** content that arrived from another machine, and
//! - **watch** for content the local user copied.
//!
//! The one hard requirement on implementations is that a `write` must never
//! show up on the `watch` stream.  Otherwise every applied payload would be
//! reported straight back to the master and bounce between slaves forever.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors returned by clipboard adapters.
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The OS clipboard could not be opened or accessed.
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// The adapter only handles text and the content is not UTF-8.
    #[error("clipboard content is not UTF-8 text")]
    NotText,

    /// The adapter's worker thread has exited.
    #[error("clipboard worker has stopped")]
    WorkerStopped,
}

/// Local clipboard access used by the sync engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipboardCapability: Send + Sync {
    /// Replaces the local clipboard content.
    ///
    /// Must not produce an event on [`watch`](Self::watch).
    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError>;

    /// Returns the stream of local clipboard changes.
    ///
    /// The stream is live and non-restartable: only the first call receives
    /// changes; later calls get a stream that is already closed.
    fn watch(&self) -> mpsc::Receiver<Vec<u8>>;
}

/// A receiver whose sender is already gone.
///
/// Returned by adapters on every `watch` call after the first.
pub fn closed_watch() -> mpsc::Receiver<Vec<u8>> {
    let (_tx, rx) = mpsc::channel(1);
    rx
}
