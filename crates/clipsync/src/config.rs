//! TOML configuration file for both roles.
//!
//! Read from `--config <path>` or, by default, from the platform config
//! directory:
//! - Windows:  `%APPDATA%\ClipSync\config.toml`
//! - Linux:    `~/.config/clipsync/config.toml`
//! - macOS:    `~/Library/Application Support/ClipSync/config.toml`
//!
//! A missing default file means "all defaults"; a missing file that was named
//! explicitly with `--config` is an error.
//!
//! ```toml
//! log_level = "info"
//!
//! [relay]
//! session_ttl_secs = 180
//! peer_ttl_secs = 180
//! sweep_interval_ms = 1000
//! send_timeout_ms = 5000
//!
//! [slave]
//! ping_interval_secs = 30
//! reconnect_interval_secs = 5
//! call_timeout_ms = 5000
//! poll_interval_ms = 250
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a file only needs the
//! keys it wants to change.  An empty file is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clipsync_master::RelayConfig;
use clipsync_slave::application::sync_engine::SyncConfig;
use clipsync_slave::infrastructure::network::MasterLinkConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No `--config` was given and the platform config directory is unknown.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A key parsed but its value is unusable.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub slave: SlaveSection,
}

/// `[relay]`: master timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelaySection {
    #[serde(default = "default_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub peer_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// `[slave]`: engine, link and clipboard timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlaveSection {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_ttl_secs() -> u64 {
    180
}
fn default_sweep_interval_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_reconnect_interval_secs() -> u64 {
    5
}
fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            relay: RelaySection::default(),
            slave: SlaveSection::default(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_ttl_secs(),
            peer_ttl_secs: default_ttl_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            send_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SlaveSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            call_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ── Conversions into runtime configs ──────────────────────────────────────────

impl RelaySection {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            peer_ttl: Duration::from_secs(self.peer_ttl_secs),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

impl SlaveSection {
    pub fn to_sync_config(&self, advertise_address: &str) -> SyncConfig {
        SyncConfig {
            advertise_address: advertise_address.to_string(),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
        }
    }

    pub fn to_link_config(&self, master_addr: &str) -> MasterLinkConfig {
        MasterLinkConfig {
            master_addr: master_addr.to_string(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `explicit`, or from the default path.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if an explicit file cannot be read, or if the
/// default file exists but cannot be read, and [`ConfigError::Parse`] if the
/// TOML is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        return parse_config(&content);
    }

    let Ok(path) = config_file_path() else {
        return Ok(AppConfig::default());
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Parses config TOML text and validates it.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML and
/// [`ConfigError::Invalid`] when a period or timeout is zero.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// Rejects zero periods and timeouts.
    ///
    /// A zero sweep or ping period would make the tick timers panic, and a
    /// zero TTL or timeout would expire everything immediately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("relay.session_ttl_secs", self.relay.session_ttl_secs),
            ("relay.peer_ttl_secs", self.relay.peer_ttl_secs),
            ("relay.sweep_interval_ms", self.relay.sweep_interval_ms),
            ("relay.send_timeout_ms", self.relay.send_timeout_ms),
            ("slave.ping_interval_secs", self.slave.ping_interval_secs),
            ("slave.reconnect_interval_secs", self.slave.reconnect_interval_secs),
            ("slave.call_timeout_ms", self.slave.call_timeout_ms),
            ("slave.poll_interval_ms", self.slave.poll_interval_ms),
        ];
        match durations.into_iter().find(|&(_, value)| value == 0) {
            Some((field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ClipSync"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("clipsync"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ClipSync")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
