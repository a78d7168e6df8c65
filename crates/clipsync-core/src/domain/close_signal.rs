//! One-shot close signal that binds an RPC call's lifetime to a registry entry.
//!
//! # Why a close signal? (for beginners)
//!
//! When a slave registers, the master-side handler for that call does not
//! return: it *suspends* until the session is over, and returning is what
//! ends the call on the wire.  "The session is over" is decided elsewhere –
//! by a failed broadcast send, by the TTL sweep, by a re-registration from
//! the same address, or by shutdown.  The [`CloseSignal`] is the wire between
//! those deciders and the suspended handler.
//!
//! The signal is built on `tokio::sync::watch`, which gives us three
//! properties for free:
//!
//! - **Idempotent**: firing twice keeps the first reason.
//! - **Level-triggered**: a waiter that arrives *after* the signal fired
//!   still observes it immediately (no lost wake-ups).
//! - **Multi-waiter**: any number of tasks may wait on the same signal.

use tokio::sync::watch;

/// Why a session ended.
///
/// The reason is logged by the master and sent to the slave in a
/// `SessionClosed` frame just before the stream is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CloseReason {
    /// A newer registration from the same address took over.
    Replaced = 0x01,
    /// A broadcast send on the session's stream failed.
    SendFailed = 0x02,
    /// The session missed its heartbeat deadline and was swept.
    Expired = 0x03,
    /// The transport reported that the peer went away.
    Disconnected = 0x04,
    /// The master is shutting down.
    Shutdown = 0x05,
}

impl TryFrom<u8> for CloseReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CloseReason::Replaced),
            0x02 => Ok(CloseReason::SendFailed),
            0x03 => Ok(CloseReason::Expired),
            0x04 => Ok(CloseReason::Disconnected),
            0x05 => Ok(CloseReason::Shutdown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CloseReason::Replaced => "replaced",
            CloseReason::SendFailed => "send failed",
            CloseReason::Expired => "expired",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// A one-shot, idempotent signal carrying the [`CloseReason`] of the first
/// [`fire`](Self::fire) call.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<Option<CloseReason>>,
}

impl CloseSignal {
    /// Creates an un-fired signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Fires the signal.
    ///
    /// Returns `true` only for the call that actually fired it; later calls
    /// are no-ops and keep the original reason.
    pub fn fire(&self, reason: CloseReason) -> bool {
        let mut fired_now = false;
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                fired_now = true;
                true
            } else {
                false
            }
        });
        fired_now
    }

    /// Returns `true` once the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Returns the reason the signal fired with, if it has fired.
    pub fn reason(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    /// Suspends until the signal fires and returns its reason.
    ///
    /// Returns immediately when the signal already fired.
    pub async fn wait(&self) -> CloseReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // `self` owns the sender, so `changed` cannot observe a closed
            // channel while we are borrowed.
            if rx.changed().await.is_err() {
                return CloseReason::Shutdown;
            }
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}
