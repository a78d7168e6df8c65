//! ClipSync: clipboard synchronization across machines.
//!
//! One process runs as the master relay (`--listen`); every participating
//! machine runs a slave (`--master` + `--advertise-address`) that reports its
//! local clipboard changes and applies everyone else's.
//!
//! # What happens at startup
//!
//! 1. CLI arguments are parsed and the config file is loaded.
//! 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins; otherwise the
//!    config file's `log_level` is used.
//! 3. The role is resolved; an inconsistent set of arguments exits non-zero.
//! 4. A Ctrl+C handler is spawned that stops the role gracefully.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clipsync::cli::{Cli, Mode};
use clipsync::config::load_config;
use clipsync::runtime::{build_slave, Master};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    match cli.mode()? {
        Mode::Master { listen } => {
            let master = Master::bind(listen, config.relay.to_relay_config()).await?;
            info!("ClipSync master starting on {}", master.local_addr()?);

            let running = Arc::new(AtomicBool::new(true));
            let running_clone = Arc::clone(&running);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("received Ctrl+C; initiating graceful shutdown");
                        running_clone.store(false, Ordering::Relaxed);
                    }
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
            });

            master.run(running).await;
            info!("ClipSync master stopped");
        }
        Mode::Slave {
            master,
            advertise_address,
        } => {
            let engine = build_slave(
                config.slave.to_link_config(&master),
                config.slave.to_sync_config(&advertise_address),
                config.slave.poll_interval(),
            )?;

            let stopper = Arc::clone(&engine);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("received Ctrl+C; initiating graceful shutdown");
                        stopper.stop();
                    }
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
            });

            engine
                .run()
                .await
                .with_context(|| format!("slave {advertise_address} stopped with an error"))?;
            info!("ClipSync slave stopped");
        }
    }
    Ok(())
}
