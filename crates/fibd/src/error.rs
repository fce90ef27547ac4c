//! Error types for fibd

use thiserror::Error;

/// Errors surfaced by the FIB coordinator, its readers and configuration.
///
/// Runtime faults inside the coordinator loop are logged rather than
/// returned; these variants are what setup paths and handles report.
#[derive(Debug, Error)]
pub enum FibError {
    /// The frame source for a port could not be attached
    #[error("Failed to attach frame source for port {port}: {source}")]
    Attach {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// A port with this name is already registered
    #[error("Port already registered: {0}")]
    PortExists(String),

    /// No registered port with this name
    #[error("Port not registered: {0}")]
    PortNotFound(String),

    /// The coordinator is gone and no longer accepts commands
    #[error("Control channel closed")]
    ControlClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address or frame parse error
    #[error("Parse error: {0}")]
    Parse(#[from] switch_types::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FibError {
    pub fn attach(port: impl Into<String>, source: std::io::Error) -> Self {
        FibError::Attach {
            port: port.into(),
            source,
        }
    }
}

/// Result type alias for fibd operations
pub type Result<T> = std::result::Result<T, FibError>;
