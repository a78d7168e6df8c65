//! Per-connection sequence numbering for outgoing frames.
//!
//! Each side of a connection stamps its frames with a monotonically
//! increasing number.  Nothing in the relay depends on it for correctness;
//! it exists so that frame dumps and log lines can be correlated.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free counter handing out sequence numbers starting at 0.
///
/// Wraps from `u64::MAX` to 0 without panicking.
///
/// ```rust
/// use clipsync_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next sequence number.
    ///
    /// `Relaxed` is enough: the value labels frames and never guards memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of sequence numbers handed out so far (modulo wrap).
    pub fn issued(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
