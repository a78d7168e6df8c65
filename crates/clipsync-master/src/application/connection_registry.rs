//! Connection registry: the live session streams and broadcast fan-out.
//!
//! Each registered slave owns exactly one [`SessionEntry`], keyed by its
//! advertised address.  The entry holds the outbound [`PayloadSink`] used to
//! push clipboard content to that slave and the [`CloseSignal`] that keeps the
//! slave's `Register` call open.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//! establish ──► live ──┬── refresh (ping) ──► live
//!                      ├── newer establish for same address ──► Replaced
//!                      ├── broadcast send fails ─────────────► SendFailed
//!                      ├── sweep finds it stale ─────────────► Expired
//!                      ├── transport goes away ──────────────► Disconnected
//!                      └── relay shuts down ─────────────────► Shutdown
//! ```
//!
//! Every exit path removes the entry *and* fires its close signal, so the
//! suspended `Register` handler wakes up and ends the call.
//!
//! # Broadcast
//!
//! Targets are snapshotted under the registry lock, the lock is released,
//! and all sends run concurrently.  A slow slave therefore delays only its
//! own delivery, and other registry operations proceed during the fan-out.
//! A failed send is never retried: the session is dropped and the slave
//! notices its stream ending and re-registers.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clipsync_core::{CloseReason, CloseSignal, FrameError, TtlRegistry};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::run_sweeper;
use crate::config::DEFAULT_TTL;

// ── Outbound sink abstraction ─────────────────────────────────────────────────

/// Errors from pushing a payload down a session stream.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The receiving side of the stream is gone.
    #[error("session stream closed")]
    Closed,

    /// The write did not complete within the send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// Encoding or writing the frame failed.
    #[error("frame write failed: {0}")]
    Frame(#[from] FrameError),
}

/// The outbound half of a session stream.
///
/// Implementations must be cheap to call concurrently with other sinks; a
/// single sink is only ever driven by one broadcast at a time because the
/// fan-out worker processes reports sequentially.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Delivers one payload to the session's slave.
    async fn send(&self, payload: &[u8]) -> Result<(), SinkError>;
}

/// A [`PayloadSink`] backed by a Tokio channel.
///
/// Used when master and slave live in the same process (tests, demos).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its payloads arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PayloadSink for ChannelSink {
    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        self.tx
            .send(payload.to_vec())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

// ── Session entry ─────────────────────────────────────────────────────────────

/// One live session: the stream to a single slave.
pub struct SessionEntry {
    id: Uuid,
    address: String,
    sink: Arc<dyn PayloadSink>,
    close: CloseSignal,
}

impl SessionEntry {
    fn new(address: &str, sink: Arc<dyn PayloadSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.to_string(),
            sink,
            close: CloseSignal::new(),
        }
    }

    /// Unique id distinguishing this session from earlier or later sessions
    /// of the same address.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Suspends until the session is closed and returns why.
    pub async fn closed(&self) -> CloseReason {
        self.close.wait().await
    }

    /// The close reason, once the session has been closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close.reason()
    }

    fn close(&self, reason: CloseReason) -> bool {
        self.close.fire(reason)
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("close", &self.close.reason())
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Number of sessions the payload was delivered to.
    pub delivered: usize,
    /// Addresses whose send failed; those sessions have been dropped.
    pub failed: Vec<String>,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// The set of live sessions, at most one per address.
#[derive(Debug)]
pub struct ConnectionRegistry {
    sessions: TtlRegistry<Arc<SessionEntry>>,
    ttl: Duration,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose sessions live for `ttl` between pings.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: TtlRegistry::new(),
            ttl,
        }
    }

    /// Registers a session for `address`.
    ///
    /// Any prior session for the same address is replaced and its close
    /// signal fires with [`CloseReason::Replaced`].
    pub fn establish(&self, address: &str, sink: Arc<dyn PayloadSink>) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry::new(address, sink));
        let previous = self.sessions.insert(address, Arc::clone(&entry), self.ttl);
        match previous {
            Some(old) => {
                old.close(CloseReason::Replaced);
                info!(%address, old = %old.id(), new = %entry.id(), "session replaced");
            }
            None => info!(%address, id = %entry.id(), "session established"),
        }
        entry
    }

    /// Refreshes the session of `address`.
    ///
    /// Returns `false` when no session exists; nothing is created.
    pub fn refresh(&self, address: &str) -> bool {
        let known = self.sessions.touch(address);
        if !known {
            debug!(%address, "refresh for unknown session ignored");
        }
        known
    }

    /// Sends `payload` to every session except `originator`'s.
    ///
    /// Sessions whose send fails are removed and closed with
    /// [`CloseReason::SendFailed`].  The registry lock is not held while
    /// sending.
    pub async fn broadcast(&self, payload: &[u8], originator: &str) -> BroadcastSummary {
        let targets: Vec<Arc<SessionEntry>> = self
            .sessions
            .snapshot()
            .into_iter()
            .filter(|(address, _)| address != originator)
            .map(|(_, entry)| entry.value)
            .collect();

        if targets.is_empty() {
            debug!(%originator, "broadcast has no recipients");
            return BroadcastSummary::default();
        }

        let sends = targets.into_iter().map(|entry| async move {
            let result = entry.sink.send(payload).await;
            (entry, result)
        });

        let mut summary = BroadcastSummary::default();
        for (entry, result) in join_all(sends).await {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(
                        address = %entry.address(),
                        error = %e,
                        "broadcast send failed; dropping session"
                    );
                    self.terminate(&entry, CloseReason::SendFailed);
                    summary.failed.push(entry.address().to_string());
                }
            }
        }
        debug!(
            %originator,
            bytes = payload.len(),
            delivered = summary.delivered,
            failed = summary.failed.len(),
            "broadcast complete"
        );
        summary
    }

    /// One eviction pass.  Returns the addresses whose sessions expired.
    pub fn sweep(&self) -> Vec<String> {
        self.sessions
            .sweep()
            .into_iter()
            .map(|(address, entry)| {
                entry.close(CloseReason::Expired);
                info!(%address, id = %entry.id(), "session expired");
                address
            })
            .collect()
    }

    /// Removes `entry` (if it is still the registered session for its
    /// address) and closes it with `reason`.
    ///
    /// Returns `true` when the entry was still registered.
    pub fn terminate(&self, entry: &SessionEntry, reason: CloseReason) -> bool {
        let removed = self
            .sessions
            .remove_if(entry.address(), |current| current.id() == entry.id())
            .is_some();
        if entry.close(reason) {
            info!(address = %entry.address(), id = %entry.id(), %reason, "session closed");
        }
        removed
    }

    /// Removes and closes every session.  Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let drained = self.sessions.drain();
        for (_, entry) in &drained {
            entry.close(reason);
        }
        if !drained.is_empty() {
            info!(count = drained.len(), %reason, "closed all sessions");
        }
        drained.len()
    }

    /// Sweeps every `period` until `running` is cleared.
    pub async fn run(&self, period: Duration, running: Arc<AtomicBool>) {
        run_sweeper(period, running, || {
            self.sweep();
        })
        .await;
        debug!("session sweeper stopped");
    }

    /// Addresses with a registered session, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .sessions
            .snapshot()
            .into_iter()
            .map(|(address, _)| address)
            .collect();
        addresses.sort();
        addresses
    }

    /// Returns `true` when `address` has a session that has not expired.
    pub fn is_live(&self, address: &str) -> bool {
        self.sessions
            .entry(address)
            .is_some_and(|entry| !entry.is_expired_at(Instant::now()))
    }

    /// The session currently registered for `address`.
    pub fn get(&self, address: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(address)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
