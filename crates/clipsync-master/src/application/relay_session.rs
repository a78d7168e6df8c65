//! RelayService: the `Register` / `Report` / `Ping` / `Info` handlers.
//!
//! # How a registration call stays open (for beginners)
//!
//! A slave's `Register` call is long-lived: the master pushes payloads down
//! it for as long as the session exists.  The handler therefore does not
//! return after registering.  It parks on two things at once:
//!
//! ```text
//!            ┌─────────── entry.closed() ──────────┐   (Replaced, SendFailed,
//! register ──┤                                      ├──► return reason   Expired, Shutdown)
//!            └──── transport `disconnected` ───────┘   (→ terminate: Disconnected)
//! ```
//!
//! Whichever completes first ends the call.  No polling is involved; the
//! close signal wakes the handler directly.
//!
//! # Fan-out ordering
//!
//! `report` acknowledges immediately and hands the content to a single
//! fan-out worker through a FIFO queue.  Because one worker processes
//! reports one at a time, every recipient sees payloads in the order the
//! master accepted the reports.

use std::future::Future;
use std::sync::Arc;

use clipsync_core::protocol::{InfoReplyMessage, PeerSummary};
use clipsync_core::CloseReason;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::connection_registry::{ConnectionRegistry, PayloadSink};
use crate::application::membership::MembershipRegistry;

/// Capacity of the fan-out queue.  `report` waits only when it is full.
const FANOUT_QUEUE_CAPACITY: usize = 1024;

/// One queued broadcast.
#[derive(Debug)]
struct FanoutJob {
    originator: String,
    content: Vec<u8>,
}

/// Point-in-time view of both registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Addresses with a registered session, sorted.
    pub sessions: Vec<String>,
    /// Valid members, sorted by address.
    pub peers: Vec<PeerSummary>,
}

impl From<ClusterInfo> for InfoReplyMessage {
    fn from(info: ClusterInfo) -> Self {
        InfoReplyMessage {
            sessions: info.sessions,
            peers: info.peers,
        }
    }
}

/// Relay call handlers bound to one pair of registries.
#[derive(Debug)]
pub struct RelayService {
    connections: Arc<ConnectionRegistry>,
    membership: Arc<MembershipRegistry>,
    fanout_tx: mpsc::Sender<FanoutJob>,
}

impl RelayService {
    /// Creates the service and spawns its fan-out worker.
    ///
    /// The worker exits once the returned service (and every clone of the
    /// `Arc`) is dropped and the queue has drained.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        connections: Arc<ConnectionRegistry>,
        membership: Arc<MembershipRegistry>,
    ) -> Arc<Self> {
        let (fanout_tx, fanout_rx) = mpsc::channel(FANOUT_QUEUE_CAPACITY);
        tokio::spawn(fanout_worker(Arc::clone(&connections), fanout_rx));
        Arc::new(Self {
            connections,
            membership,
            fanout_tx,
        })
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn membership(&self) -> &Arc<MembershipRegistry> {
        &self.membership
    }

    /// Handles a `Register` call.
    ///
    /// Makes `address` a member, establishes its session with `sink` as the
    /// outbound stream, and suspends until the session ends or
    /// `disconnected` completes.  Returns why the session ended.
    pub async fn register<D>(
        &self,
        address: &str,
        sink: Arc<dyn PayloadSink>,
        disconnected: D,
    ) -> CloseReason
    where
        D: Future<Output = ()>,
    {
        self.membership.upsert(address);
        let entry = self.connections.establish(address, sink);

        let reason = tokio::select! {
            biased;
            reason = entry.closed() => reason,
            () = disconnected => {
                self.connections.terminate(&entry, CloseReason::Disconnected);
                entry.close_reason().unwrap_or(CloseReason::Disconnected)
            }
        };
        info!(%address, id = %entry.id(), %reason, "registration ended");
        reason
    }

    /// Handles a `Report` call.
    ///
    /// Queues `content` for fan-out to every session except `address` and
    /// returns without waiting for delivery.
    ///
    /// A report from an address without a live session is dropped.  Returns
    /// `true` when the report was queued.
    pub async fn report(&self, content: Vec<u8>, address: &str) -> bool {
        if !self.connections.is_live(address) {
            debug!(%address, "report from unknown session ignored");
            return false;
        }
        self.membership.touch(address, None);
        debug!(%address, bytes = content.len(), "report accepted");
        let job = FanoutJob {
            originator: address.to_string(),
            content,
        };
        if self.fanout_tx.send(job).await.is_err() {
            warn!(%address, "fan-out worker is gone; report dropped");
            return false;
        }
        true
    }

    /// Handles a `Ping` call.
    ///
    /// Returns `true` when `address` had a session to refresh.  Either way
    /// the call is acknowledged.
    pub fn ping(&self, address: &str) -> bool {
        let refreshed = self.connections.refresh(address);
        self.membership.touch(address, None);
        debug!(%address, refreshed, "ping");
        refreshed
    }

    /// Handles an `Info` call.
    pub fn info(&self) -> ClusterInfo {
        let now = Instant::now();
        let mut peers = Vec::new();
        self.membership.for_each(|record| {
            peers.push(PeerSummary {
                address: record.address.clone(),
                ttl_secs: clamp_secs(record.ttl.as_secs()),
                idle_secs: clamp_secs(record.idle_at(now).as_secs()),
            });
        });
        ClusterInfo {
            sessions: self.connections.addresses(),
            peers,
        }
    }

    /// Closes every session with [`CloseReason::Shutdown`].
    pub fn shutdown(&self) -> usize {
        self.connections.close_all(CloseReason::Shutdown)
    }
}

fn clamp_secs(secs: u64) -> u32 {
    u32::try_from(secs).unwrap_or(u32::MAX)
}

async fn fanout_worker(connections: Arc<ConnectionRegistry>, mut rx: mpsc::Receiver<FanoutJob>) {
    while let Some(job) = rx.recv().await {
        connections.broadcast(&job.content, &job.originator).await;
    }
    debug!("fan-out worker stopped");
}
