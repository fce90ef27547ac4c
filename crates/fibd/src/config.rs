//! Configuration file support for fibd
//!
//! Loads and validates the daemon configuration from TOML.
//! Default location: /etc/fibd/fibd.toml

use crate::coordinator::{
    CoordinatorSettings, DEFAULT_CONTROL_QUEUE_DEPTH, DEFAULT_PORT_QUEUE_DEPTH,
};
use crate::error::{FibError, Result};
use crate::reader::{ReaderSettings, DEFAULT_AGING_SECS, DEFAULT_FRAME_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use switch_types::{MacAddress, ETHERNET_HEADER_LEN};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fibd/fibd.toml";

/// A permanent entry installed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticEntry {
    pub mac: MacAddress,
    pub port: String,
}

/// Complete fibd configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibdConfig {
    /// Name of the bridge's forwarding table
    #[serde(default = "default_fib_name")]
    pub fib_name: String,

    /// Directory holding one monitoring socket per port
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Seconds without traffic before a learned MAC is expired
    #[serde(default = "default_aging_secs")]
    pub aging_secs: u64,

    /// Capacity of each port's command channel
    #[serde(default = "default_port_queue_depth")]
    pub port_queue_depth: usize,

    /// Capacity of the administrative command channel
    #[serde(default = "default_control_queue_depth")]
    pub control_queue_depth: usize,

    /// Receive buffer per port reader
    #[serde(default = "default_frame_buffer_size")]
    pub frame_buffer_size: usize,

    /// Flush a port's entries when it is unregistered
    #[serde(default = "default_flush_on_port_close")]
    pub flush_on_port_close: bool,

    /// Ports attached at startup
    #[serde(default)]
    pub ports: Vec<String>,

    /// Permanent entries installed at startup
    #[serde(default)]
    pub static_entries: Vec<StaticEntry>,
}

fn default_fib_name() -> String {
    "l2fib".to_string()
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/run/fibd")
}

fn default_aging_secs() -> u64 {
    DEFAULT_AGING_SECS as u64
}

fn default_port_queue_depth() -> usize {
    DEFAULT_PORT_QUEUE_DEPTH
}

fn default_control_queue_depth() -> usize {
    DEFAULT_CONTROL_QUEUE_DEPTH
}

fn default_frame_buffer_size() -> usize {
    DEFAULT_FRAME_BUFFER_SIZE
}

fn default_flush_on_port_close() -> bool {
    true
}

impl Default for FibdConfig {
    fn default() -> Self {
        Self {
            fib_name: default_fib_name(),
            socket_dir: default_socket_dir(),
            aging_secs: default_aging_secs(),
            port_queue_depth: default_port_queue_depth(),
            control_queue_depth: default_control_queue_depth(),
            frame_buffer_size: default_frame_buffer_size(),
            flush_on_port_close: default_flush_on_port_close(),
            ports: Vec::new(),
            static_entries: Vec::new(),
        }
    }
}

impl FibdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FibError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(FibError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FibError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.fib_name.is_empty() {
            return Err(FibError::Config("fib_name must not be empty".to_string()));
        }

        if self.aging_secs == 0 || i64::try_from(self.aging_secs).is_err() {
            return Err(FibError::Config(format!(
                "aging_secs out of range: {}",
                self.aging_secs
            )));
        }

        if self.port_queue_depth == 0 {
            return Err(FibError::Config("port_queue_depth must be > 0".to_string()));
        }

        if self.control_queue_depth == 0 {
            return Err(FibError::Config(
                "control_queue_depth must be > 0".to_string(),
            ));
        }

        if self.frame_buffer_size < ETHERNET_HEADER_LEN {
            return Err(FibError::Config(format!(
                "frame_buffer_size must be at least {}",
                ETHERNET_HEADER_LEN
            )));
        }

        let mut seen = HashSet::new();
        for port in &self.ports {
            validate_port_name(port)?;
            if !seen.insert(port.as_str()) {
                return Err(FibError::Config(format!("duplicate port: {}", port)));
            }
        }

        for entry in &self.static_entries {
            validate_port_name(&entry.port)?;
            if entry.mac.is_multicast() {
                return Err(FibError::Config(format!(
                    "static entry {} is not a unicast MAC",
                    entry.mac
                )));
            }
        }

        Ok(())
    }

    /// Coordinator tunables derived from this configuration.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            reader: ReaderSettings {
                aging_secs: i64::try_from(self.aging_secs).unwrap_or(i64::MAX),
                frame_buffer_size: self.frame_buffer_size,
            },
            port_queue_depth: self.port_queue_depth,
            control_queue_depth: self.control_queue_depth,
            flush_on_port_close: self.flush_on_port_close,
        }
    }
}

/// Port names become socket file names under `socket_dir`.
fn validate_port_name(port: &str) -> Result<()> {
    if port.is_empty() || port.contains('/') || port == "." || port == ".." {
        return Err(FibError::Config(format!("invalid port name: {:?}", port)));
    }
    Ok(())
}
