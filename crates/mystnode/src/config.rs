//! Node configuration.
//!
//! Values come from an optional `mystnode.toml` and are then overridden by
//! command line flags. The resolved [`NodeConfig`] is built once at startup
//! and handed to the components that need it.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::connection::Location;

/// The config file name looked up in the data directory when `--config` is absent
pub const CONFIG_FILE_NAME: &str = "mystnode.toml";

pub const DEFAULT_TEQUILAPI_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_TEQUILAPI_PORT: u16 = 4050;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_OPENVPN_BINARY: &str = "openvpn";

/// Configuration as written in `mystnode.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    /// OpenVPN binary used for tunnel connections
    pub openvpn_binary: Option<PathBuf>,
    #[serde(default)]
    pub tequilapi: TequilapiFileConfig,
    /// Location reported by `/connection/location`
    pub location: Option<Location>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TequilapiFileConfig {
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
}

impl FileConfig {
    /// Load configuration from `path`.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(config))
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub openvpn_binary: Option<PathBuf>,
    pub tequilapi_address: Option<IpAddr>,
    pub tequilapi_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TequilapiConfig {
    pub address: IpAddr,
    pub port: u16,
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub openvpn_binary: PathBuf,
    pub tequilapi: TequilapiConfig,
    pub location: Option<Location>,
}

impl NodeConfig {
    /// Merge file values and flags. Priority: flag > file > default.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        Self {
            data_dir: overrides
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(Self::default_data_dir),
            log_level: overrides
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_dir: overrides.log_dir.or(file.log_dir),
            openvpn_binary: overrides
                .openvpn_binary
                .or(file.openvpn_binary)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OPENVPN_BINARY)),
            tequilapi: TequilapiConfig {
                address: overrides
                    .tequilapi_address
                    .or(file.tequilapi.address)
                    .unwrap_or(DEFAULT_TEQUILAPI_ADDRESS),
                port: overrides
                    .tequilapi_port
                    .or(file.tequilapi.port)
                    .unwrap_or(DEFAULT_TEQUILAPI_PORT),
            },
            location: file.location,
        }
    }

    /// Get the default data directory.
    ///
    /// The default location is `~/.local/share/mystnode`.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mystnode")
    }
}
