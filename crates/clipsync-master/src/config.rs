//! Runtime tunables for the relay.
//!
//! The file-backed TOML layer lives in the `clipsync` binary crate; it
//! converts its `[relay]` table into this plain struct.

use std::time::Duration;

/// Default TTL for both sessions and peer records.
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

/// Default period of the background eviction sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on one outbound `Payload` write.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// How long a session stays live without a ping.
    pub session_ttl: Duration,
    /// How long a peer stays a member without any liveness signal.
    pub peer_ttl: Duration,
    /// Period of both eviction sweeps.
    pub sweep_interval: Duration,
    /// A `Payload` write slower than this counts as a failed send.
    pub send_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_TTL,
            peer_ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}
