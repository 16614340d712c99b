//! Configuration file handling for depthgate.
//!
//! Loads configuration from `~/.config/depthgate/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::container::{UsbFilter, DEFAULT_PORT, DEFAULT_PRODUCT_IDS, DEFAULT_VENDOR_ID};
use crate::images::FlavorRequest;

/// Configuration file structure for depthgate.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Which backend hosts the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Process,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Docker => write!(f, "docker"),
            RuntimeKind::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    /// First port tried for the environment
    pub port: Option<u16>,
    /// Startup deadline
    pub timeout_secs: u64,
    pub flavor: FlavorRequest,
    pub image: Option<String>,
    pub auto_build: bool,
    pub runtime: RuntimeKind,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: Some(DEFAULT_PORT),
            timeout_secs: 60,
            flavor: FlavorRequest::Auto,
            image: None,
            auto_build: true,
            runtime: RuntimeKind::Docker,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Searched for build scripts before `./docker`
    pub build_dirs: Vec<PathBuf>,
    /// Display passed to the environment (defaults to `$DISPLAY`)
    pub display: Option<String>,
    /// Mounted as the environment's working directory
    pub workdir: Option<PathBuf>,
    pub stop_grace_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            build_dirs: Vec::new(),
            display: None,
            workdir: None,
            stop_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub vendor_id: String,
    pub product_ids: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID.to_string(),
            product_ids: DEFAULT_PRODUCT_IDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DeviceConfig {
    pub fn usb_filter(&self) -> UsbFilter {
        UsbFilter {
            vendor_id: self.vendor_id.clone(),
            product_ids: self.product_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Longest a request waits for the session lock
    pub lock_timeout_ms: u64,
    /// Serial reported by the simulated sensor
    pub serial: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            serial: None,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Write this configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Errors that can occur when loading or saving configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    SerializeError {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to access config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::SerializeError { path, source } => {
                write!(
                    f,
                    "Failed to serialize config for '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::SerializeError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("depthgate").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/depthgate/config.toml")
        })
}
