//! Membership registry: which slave addresses are currently known alive.
//!
//! A slave becomes a member when it registers, and stays one as long as
//! *some* liveness signal (a report, a ping) arrives within its TTL.  The
//! background sweep forgets members that went quiet.
//!
//! ```text
//!   upsert ──► [ PeerRecord ] ◄── touch (refresh only, never creates)
//!                    │
//!          sweep: last_seen_at + ttl <= now
//!                    ▼
//!                 removed
//! ```
//!
//! Membership is independent from the session registry: a peer can be a
//! member without a live session (its stream just dropped) and the relay
//! never consults membership when routing payloads.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clipsync_core::{TtlEntry, TtlRegistry};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::application::run_sweeper;
use crate::config::DEFAULT_TTL;

/// A point-in-time view of one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: String,
    pub ttl: Duration,
    pub last_seen_at: Instant,
}

impl PeerRecord {
    fn from_entry(address: String, entry: &TtlEntry<()>) -> Self {
        Self {
            address,
            ttl: entry.ttl,
            last_seen_at: entry.last_seen,
        }
    }

    /// Time elapsed since the peer was last seen, relative to `now`.
    pub fn idle_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_at)
    }
}

/// TTL-keyed set of peer addresses.
#[derive(Debug)]
pub struct MembershipRegistry {
    peers: TtlRegistry<()>,
    ttl: Duration,
}

impl MembershipRegistry {
    /// Creates an empty registry whose new records live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: TtlRegistry::new(),
            ttl,
        }
    }

    /// TTL given to records created by [`upsert`](Self::upsert).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Adds `address`, or refreshes it if it is already a valid member.
    ///
    /// A record that has expired but not yet been swept is replaced by a
    /// fresh one.  Returns `true` when a new record was created.
    pub fn upsert(&self, address: &str) -> bool {
        let created = self.peers.upsert_with(address, self.ttl, || ());
        if created {
            info!(%address, "peer joined");
        }
        created
    }

    /// Refreshes an existing member.
    ///
    /// `observed_at` is when the liveness signal was observed; `None` means
    /// now.  An unknown address is ignored: only [`upsert`](Self::upsert)
    /// brings a peer back.
    pub fn touch(&self, address: &str, observed_at: Option<Instant>) -> bool {
        let known = self
            .peers
            .touch_at(address, observed_at.unwrap_or_else(Instant::now));
        if !known {
            debug!(%address, "touch for unknown peer ignored");
        }
        known
    }

    /// Calls `visit` for every member that is valid right now.
    ///
    /// The visitor runs on a snapshot taken before the first call, so it may
    /// freely call back into the registry.
    pub fn for_each(&self, mut visit: impl FnMut(&PeerRecord)) {
        for record in self.records() {
            visit(&record);
        }
    }

    /// Snapshot of every valid member, sorted by address.
    pub fn records(&self) -> Vec<PeerRecord> {
        let now = Instant::now();
        let mut records: Vec<PeerRecord> = self
            .peers
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(address, entry)| PeerRecord::from_entry(address, &entry))
            .collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// One eviction pass.  Returns the addresses that were removed.
    pub fn sweep(&self) -> Vec<String> {
        let evicted: Vec<String> = self
            .peers
            .sweep()
            .into_iter()
            .map(|(address, ())| address)
            .collect();
        for address in &evicted {
            info!(%address, "peer expired");
        }
        evicted
    }

    /// Sweeps every `period` until `running` is cleared.
    pub async fn run(&self, period: Duration, running: Arc<AtomicBool>) {
        run_sweeper(period, running, || {
            self.sweep();
        })
        .await;
        debug!("membership sweeper stopped");
    }

    /// Returns `true` when `address` has a record, expired or not.
    pub fn contains(&self, address: &str) -> bool {
        self.peers.contains(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for MembershipRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
