//! Process bootstrap for each role.
//!
//! Both functions wire the library crates together and run until told to
//! stop: the master until `running` is cleared, the slave until its engine's
//! `stop()` is called.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clipsync_master::application::connection_registry::ConnectionRegistry;
use clipsync_master::application::membership::MembershipRegistry;
use clipsync_master::application::relay_session::RelayService;
use clipsync_master::infrastructure::network::RelayServer;
use clipsync_master::RelayConfig;
use clipsync_slave::application::clipboard::ClipboardCapability;
use clipsync_slave::application::sync_engine::{SyncConfig, SyncEngine};
use clipsync_slave::infrastructure::clipboard::SystemClipboard;
use clipsync_slave::infrastructure::network::{MasterLinkConfig, TcpMasterLink};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Time given to connection tasks to deliver `SessionClosed(Shutdown)`.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// A relay that has bound its listener but not started accepting.
pub struct Master {
    server: RelayServer,
    relay: Arc<RelayService>,
    config: RelayConfig,
}

impl Master {
    /// Builds both registries and the relay, and binds `listen`.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound.
    pub async fn bind(listen: SocketAddr, config: RelayConfig) -> anyhow::Result<Self> {
        let relay = RelayService::start(
            Arc::new(ConnectionRegistry::new(config.session_ttl)),
            Arc::new(MembershipRegistry::new(config.peer_ttl)),
        );
        let server = RelayServer::bind(listen, Arc::clone(&relay), config.send_timeout)
            .await
            .with_context(|| format!("cannot listen on {listen}"))?;
        Ok(Self {
            server,
            relay,
            config,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    pub fn relay(&self) -> &Arc<RelayService> {
        &self.relay
    }

    /// Runs the accept loop and both sweepers until `running` is cleared,
    /// then closes every session with `Shutdown`.
    pub async fn run(self, running: Arc<AtomicBool>) {
        let period = self.config.sweep_interval;
        let connections = Arc::clone(self.relay.connections());
        let membership = Arc::clone(self.relay.membership());
        let sweepers = [
            (
                "session",
                tokio::spawn({
                    let running = Arc::clone(&running);
                    async move { connections.run(period, running).await }
                }),
            ),
            (
                "membership",
                tokio::spawn({
                    let running = Arc::clone(&running);
                    async move { membership.run(period, running).await }
                }),
            ),
        ];

        self.server.run(running).await;

        let closed = self.relay.shutdown();
        info!(closed, "relay stopped; closing sessions");
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        join_sweepers(sweepers).await;
    }
}

/// Waits for every sweeper and logs any that panicked or were cancelled.
///
/// Returns how many failed.
async fn join_sweepers<I>(sweepers: I) -> usize
where
    I: IntoIterator<Item = (&'static str, JoinHandle<()>)>,
{
    let mut failed = 0;
    for (name, sweeper) in sweepers {
        if let Err(e) = sweeper.await {
            error!(sweeper = name, error = %e, "registry sweeper failed");
            failed += 1;
        }
    }
    failed
}

/// Builds a slave engine on the OS clipboard.
///
/// # Errors
///
/// Fails if the OS clipboard cannot be opened.
pub fn build_slave(
    link_config: MasterLinkConfig,
    sync_config: SyncConfig,
    poll_interval: Duration,
) -> anyhow::Result<Arc<SyncEngine>> {
    let clipboard: Arc<dyn ClipboardCapability> =
        Arc::new(SystemClipboard::start(poll_interval).context("cannot open the OS clipboard")?);
    Ok(build_engine(link_config, sync_config, clipboard))
}

/// Builds a slave engine on any clipboard, talking TCP to the master.
pub fn build_engine(
    link_config: MasterLinkConfig,
    sync_config: SyncConfig,
    clipboard: Arc<dyn ClipboardCapability>,
) -> Arc<SyncEngine> {
    info!(
        master = %link_config.master_addr,
        address = %sync_config.advertise_address,
        "slave configured"
    );
    let link = Arc::new(TcpMasterLink::new(link_config));
    Arc::new(SyncEngine::new(sync_config, link, clipboard))
}
