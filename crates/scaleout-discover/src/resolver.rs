//! Point-to-point address derivation from a peer's port description.
//!
//! The peer advertises `<port name> <address>/30`. A /30 has two usable
//! hosts that differ only in the two low bits, so the local side is the
//! peer's address with those bits toggled.

use scaleout_types::IpPrefix;
use std::net::Ipv4Addr;

use crate::error::{DiscoverError, Result};

/// Only point-to-point /30 blocks are supported.
pub const PEER_PREFIX_LEN: u8 = 30;

/// Mask toggling the two host bits of a /30.
const MASK30_HOST_BITS: u8 = 0x3;

/// Outcome of a successful resolution: the peer's address and ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPeer {
    /// Address advertised by the peer.
    pub peer: Ipv4Addr,
    /// Derived local address in the same /30.
    pub local: Ipv4Addr,
}

impl ResolvedPeer {
    /// The local address as it is configured on the link.
    pub fn local_prefix(&self) -> IpPrefix {
        IpPrefix::v4(self.local, PEER_PREFIX_LEN)
    }
}

/// Derives the local /30 address for `ifname` from the peer port description.
pub fn resolve_mask30(ifname: &str, description: &str) -> Result<ResolvedPeer> {
    let mut tokens = description.split_whitespace();
    let (Some(_), Some(address)) = (tokens.next(), tokens.next()) else {
        return Err(DiscoverError::PeerDescription {
            ifname: ifname.to_string(),
            description: description.to_string(),
        });
    };

    let prefix: IpPrefix = address.parse().map_err(|e| DiscoverError::PeerAddress {
        ifname: ifname.to_string(),
        address: address.to_string(),
        source: e,
    })?;

    let Some(peer) = prefix.ipv4() else {
        return Err(DiscoverError::PeerAddress {
            ifname: ifname.to_string(),
            address: address.to_string(),
            source: scaleout_types::ParseError::InvalidIpAddress(format!(
                "{} is not an IPv4 address",
                prefix.address()
            )),
        });
    };

    if prefix.prefix_len() != PEER_PREFIX_LEN {
        return Err(DiscoverError::PeerMask {
            ifname: ifname.to_string(),
            mask: prefix.prefix_len(),
        });
    }

    let mut octets = peer.octets();
    octets[3] ^= MASK30_HOST_BITS;

    Ok(ResolvedPeer {
        peer,
        local: Ipv4Addr::from(octets),
    })
}
