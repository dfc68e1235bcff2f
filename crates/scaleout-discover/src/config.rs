//! Command line and configuration file handling.
//!
//! Every option can be given on the command line or in a TOML file passed
//! with `--config`. Command line values win over file values, which win
//! over the defaults.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::devices::DEFAULT_SYSFS_ROOT;
use crate::error::{DiscoverError, Result};
use crate::metrics_server::{DEFAULT_METRICS_PATH, MetricsServerConfig, parse_bind_address};
use crate::pfc::{LLDPTOOL_BINARY, PfcPriorities};

/// Default time to wait for peer data, in seconds.
pub const DEFAULT_WAIT_SECS: u64 = 30;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Network mode of the scale-out links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum Mode {
    /// Layer 2: links are brought up, no addresses.
    #[default]
    #[value(name = "L2")]
    L2,
    /// Layer 3: /30 addresses derived from the peers.
    #[value(name = "L3")]
    L3,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::L2 => write!(f, "L2"),
            Mode::L3 => write!(f, "L3"),
        }
    }
}

/// Scale-out NIC discovery and link configuration
#[derive(Parser, Debug, Default)]
#[command(name = "discover")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configure addresses and PFC, not only report
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub configure: Option<bool>,

    /// Keep running after configuration until SIGINT/SIGTERM
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub keep_running: Option<bool>,

    /// Network mode
    #[arg(long, value_enum, ignore_case = true)]
    pub mode: Option<Mode>,

    /// Seconds to wait for peer data from the LLDP agent
    #[arg(long, value_name = "SECONDS")]
    pub wait: Option<u64>,

    /// NIC network file to write in L3 mode
    #[arg(long, value_name = "FILE")]
    pub gaudinet: Option<PathBuf>,

    /// PFC priorities, e.g. "0,3" ("none" or "" disables PFC)
    #[arg(long)]
    pub pfc: Option<String>,

    /// Metrics listen address, e.g. ":9100" (metrics disabled when unset)
    #[arg(long, value_name = "ADDR")]
    pub metrics_bind_address: Option<String>,

    /// Metrics scrape path
    #[arg(long, value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Root of the sysfs tree
    #[arg(long, env = "SYSFS_ROOT", value_name = "DIR")]
    pub sysfs_root: Option<PathBuf>,

    /// Name or path of the lldptool binary
    #[arg(long, value_name = "BINARY")]
    pub lldptool: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,
}

/// Options read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub configure: Option<bool>,
    pub keep_running: Option<bool>,
    pub mode: Option<Mode>,
    pub wait: Option<u64>,
    pub gaudinet: Option<PathBuf>,
    pub pfc: Option<String>,
    pub metrics_bind_address: Option<String>,
    pub metrics_path: Option<String>,
    pub sysfs_root: Option<PathBuf>,
    pub lldptool: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DiscoverError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            DiscoverError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub configure: bool,
    pub keep_running: bool,
    pub mode: Mode,
    pub wait: Duration,
    pub gaudinet: Option<PathBuf>,
    /// Raw PFC list; `None` leaves PFC untouched.
    pub pfc: Option<String>,
    /// Raw metrics bind address; `None` or empty disables metrics.
    pub metrics_bind_address: Option<String>,
    pub metrics_path: String,
    pub sysfs_root: PathBuf,
    pub lldptool: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            configure: false,
            keep_running: false,
            mode: Mode::default(),
            wait: Duration::from_secs(DEFAULT_WAIT_SECS),
            gaudinet: None,
            pfc: None,
            metrics_bind_address: None,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            lldptool: LLDPTOOL_BINARY.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from parsed arguments, reading the file
    /// named by `--config` if any.
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(args, file))
    }

    /// Layers `args` over `file` over the defaults.
    pub fn merge(args: Args, file: FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            configure: args.configure.or(file.configure).unwrap_or(defaults.configure),
            keep_running: args
                .keep_running
                .or(file.keep_running)
                .unwrap_or(defaults.keep_running),
            mode: args.mode.or(file.mode).unwrap_or(defaults.mode),
            wait: args
                .wait
                .or(file.wait)
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait),
            gaudinet: args.gaudinet.or(file.gaudinet),
            pfc: args.pfc.or(file.pfc),
            metrics_bind_address: args.metrics_bind_address.or(file.metrics_bind_address),
            metrics_path: args
                .metrics_path
                .or(file.metrics_path)
                .unwrap_or(defaults.metrics_path),
            sysfs_root: args.sysfs_root.or(file.sysfs_root).unwrap_or(defaults.sysfs_root),
            lldptool: args.lldptool.or(file.lldptool).unwrap_or(defaults.lldptool),
            log_level: args.log_level.or(file.log_level).unwrap_or(defaults.log_level),
        }
    }

    /// Validated PFC priorities; `None` when PFC is left untouched.
    pub fn pfc_priorities(&self) -> Result<Option<PfcPriorities>> {
        self.pfc.as_deref().map(str::parse).transpose()
    }

    /// Metrics server settings; `None` when no bind address is set.
    pub fn metrics_server(&self) -> Result<Option<MetricsServerConfig>> {
        let Some(addr) = self.metrics_bind_address.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let listen_addr = parse_bind_address(addr)?;
        Ok(Some(MetricsServerConfig::new(listen_addr).with_path(self.metrics_path.clone())))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pfc_priorities()?;
        self.metrics_server()?;

        if !self.metrics_path.starts_with('/') {
            return Err(DiscoverError::config(format!(
                "metrics path '{}' must start with '/'",
                self.metrics_path
            )));
        }

        if self.gaudinet.is_some() && self.mode != Mode::L3 {
            tracing::warn!("NIC network file is only written in L3 mode");
        }

        Ok(())
    }
}
