//! Ethernet II framing, on top of smoltcp's wire types.
//!
//! Port readers only ever need the source address, so nothing past the
//! header is looked at and the EtherType is not validated.

use crate::{MacAddress, ParseError};
use smoltcp::wire::{EthernetAddress, EthernetFrame};

/// Destination (6) + source (6) + EtherType/length (2).
pub use smoltcp::wire::ETHERNET_HEADER_LEN;

/// Source address of the Ethernet II frame at the start of `frame`.
pub fn source_mac(frame: &[u8]) -> Result<MacAddress, ParseError> {
    let header =
        EthernetFrame::new_checked(frame).map_err(|_| ParseError::TruncatedFrame(frame.len()))?;
    Ok(header.src_addr().into())
}

impl From<EthernetAddress> for MacAddress {
    fn from(addr: EthernetAddress) -> Self {
        MacAddress::new(addr.0)
    }
}

impl From<MacAddress> for EthernetAddress {
    fn from(mac: MacAddress) -> Self {
        EthernetAddress(*mac.as_bytes())
    }
}
