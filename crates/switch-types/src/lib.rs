//! Shared L2 types for the bridge control plane.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`source_mac`]: the source address of an Ethernet II frame, decoded
//!   with smoltcp

mod ethernet;
mod mac;

pub use ethernet::{source_mac, ETHERNET_HEADER_LEN};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("truncated Ethernet frame: {0} bytes (need at least 14)")]
    TruncatedFrame(usize),
}
