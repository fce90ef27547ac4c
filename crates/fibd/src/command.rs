//! Control commands exchanged between port readers, the administrative
//! handle and the coordinator.

use std::fmt;
use switch_types::MacAddress;

/// A FIB control command.
///
/// The set is closed: the coordinator dispatches with an exhaustive `match`,
/// so a new variant cannot be added without handling it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FibCommand {
    /// First sighting of a unicast source MAC on a port
    Learn {
        mac: MacAddress,
        port: String,
        timestamp: i64,
    },
    /// A reader-local entry went stale
    Expire { mac: MacAddress, port: String },
    /// Administrative permanent entry
    Add { mac: MacAddress, port: String },
    /// Attach and start reading a new port
    AddPort { name: String },
    /// A port's frame stream ended, or an operator removed it
    Close { port: String },
}

impl FibCommand {
    pub fn learn(mac: MacAddress, port: impl Into<String>, timestamp: i64) -> Self {
        FibCommand::Learn {
            mac,
            port: port.into(),
            timestamp,
        }
    }

    pub fn expire(mac: MacAddress, port: impl Into<String>) -> Self {
        FibCommand::Expire {
            mac,
            port: port.into(),
        }
    }

    pub fn add(mac: MacAddress, port: impl Into<String>) -> Self {
        FibCommand::Add {
            mac,
            port: port.into(),
        }
    }

    pub fn add_port(name: impl Into<String>) -> Self {
        FibCommand::AddPort { name: name.into() }
    }

    pub fn close(port: impl Into<String>) -> Self {
        FibCommand::Close { port: port.into() }
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FibCommand::Learn { .. } => "LEARN",
            FibCommand::Expire { .. } => "EXPIRE",
            FibCommand::Add { .. } => "ADD",
            FibCommand::AddPort { .. } => "ADDPORT",
            FibCommand::Close { .. } => "CLOSE",
        }
    }

    /// The port the command refers to.
    pub fn port(&self) -> &str {
        match self {
            FibCommand::Learn { port, .. }
            | FibCommand::Expire { port, .. }
            | FibCommand::Add { port, .. }
            | FibCommand::Close { port } => port,
            FibCommand::AddPort { name } => name,
        }
    }
}

impl fmt::Display for FibCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FibCommand::Learn {
                mac,
                port,
                timestamp,
            } => write!(f, "LEARN {mac} on {port} at {timestamp}"),
            FibCommand::Expire { mac, port } => write!(f, "EXPIRE {mac} on {port}"),
            FibCommand::Add { mac, port } => write!(f, "ADD {mac} on {port}"),
            FibCommand::AddPort { name } => write!(f, "ADDPORT {name}"),
            FibCommand::Close { port } => write!(f, "CLOSE {port}"),
        }
    }
}
