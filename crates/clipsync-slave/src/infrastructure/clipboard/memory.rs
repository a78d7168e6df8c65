//! In-memory clipboard for tests and headless runs.
//!
//! `simulate_copy` plays the part of the local user copying something: it
//! updates the content and emits a change on the watch stream.  `write`
//! (what the engine calls for inbound payloads) updates the content and
//! records it, but emits nothing.
//!
//! # `should_fail` flag
//!
//! Call [`MemoryClipboard::set_failing`] to make every `write` fail, so the
//! engine's error path can be exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::clipboard::{closed_watch, ClipboardCapability, ClipboardError};

const CHANGE_BUFFER: usize = 64;

/// A clipboard that lives in memory.
#[derive(Debug)]
pub struct MemoryClipboard {
    content: Mutex<Option<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    change_tx: mpsc::Sender<Vec<u8>>,
    change_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    should_fail: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryClipboard {
    pub fn new() -> Self {
        let (change_tx, change_rx) = mpsc::channel(CHANGE_BUFFER);
        Self {
            content: Mutex::new(None),
            written: Mutex::new(Vec::new()),
            change_tx,
            change_rx: Mutex::new(Some(change_rx)),
            should_fail: AtomicBool::new(false),
        }
    }

    /// Simulates the local user copying `content`.
    ///
    /// Returns `false` when the change could not be queued (buffer full or
    /// nobody watching any more).
    pub fn simulate_copy(&self, content: impl Into<Vec<u8>>) -> bool {
        let content = content.into();
        *lock(&self.content) = Some(content.clone());
        self.change_tx.try_send(content).is_ok()
    }

    /// Every payload applied through `write`, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.written).clone()
    }

    /// Current clipboard content.
    pub fn current(&self) -> Option<Vec<u8>> {
        lock(&self.content).clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

impl Default for MemoryClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipboardCapability for MemoryClipboard {
    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(ClipboardError::Unavailable("simulated failure".into()));
        }
        *lock(&self.content) = Some(content.to_vec());
        lock(&self.written).push(content.to_vec());
        Ok(())
    }

    fn watch(&self) -> mpsc::Receiver<Vec<u8>> {
        lock(&self.change_rx).take().unwrap_or_else(closed_watch)
    }
}
