//! Command-line interface.
//!
//! ```text
//! clipsync --listen <ADDR>                                   # master
//! clipsync --master <HOST:PORT> --advertise-address <ADDR>   # slave
//!
//! Options:
//!   --config <PATH>   TOML config file [default: platform config dir]
//! ```
//!
//! Every option can also come from the environment; CLI args take precedence.
//!
//! | Variable                     | Option                |
//! |------------------------------|-----------------------|
//! | `CLIPSYNC_LISTEN`            | `--listen`            |
//! | `CLIPSYNC_MASTER`            | `--master`            |
//! | `CLIPSYNC_ADVERTISE_ADDRESS` | `--advertise-address` |
//! | `CLIPSYNC_CONFIG`            | `--config`            |
//!
//! Exactly one role must be chosen.  That rule is checked by
//! [`Cli::mode`] rather than by clap so that the env fallbacks take part
//! in it too.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

/// Errors from an inconsistent set of arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("--listen and --master are mutually exclusive")]
    BothRoles,

    #[error("one of --listen (master) or --master (slave) is required")]
    NoRole,

    #[error("--advertise-address is required with --master")]
    MissingAdvertiseAddress,
}

/// Clipboard synchronization across machines.
#[derive(Debug, Parser)]
#[command(name = "clipsync", about = "Clipboard synchronization relay and client", version)]
pub struct Cli {
    /// Run as master and listen for slaves on this address.
    #[arg(long, env = "CLIPSYNC_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Run as slave and connect to the master at this `host:port`.
    #[arg(long, env = "CLIPSYNC_MASTER")]
    pub master: Option<String>,

    /// Address this slave registers under; must be unique per slave.
    #[arg(long, env = "CLIPSYNC_ADVERTISE_ADDRESS")]
    pub advertise_address: Option<String>,

    /// Path to a TOML config file.
    #[arg(long, env = "CLIPSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// The role selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Master {
        listen: SocketAddr,
    },
    Slave {
        master: String,
        advertise_address: String,
    },
}

impl Cli {
    /// Resolves the role.
    ///
    /// # Errors
    ///
    /// See [`CliError`].
    pub fn mode(&self) -> Result<Mode, CliError> {
        match (self.listen, &self.master) {
            (Some(_), Some(_)) => Err(CliError::BothRoles),
            (None, None) => Err(CliError::NoRole),
            (Some(listen), None) => Ok(Mode::Master { listen }),
            (None, Some(master)) => {
                let advertise_address = self
                    .advertise_address
                    .clone()
                    .ok_or(CliError::MissingAdvertiseAddress)?;
                Ok(Mode::Slave {
                    master: master.clone(),
                    advertise_address,
                })
            }
        }
    }
}
