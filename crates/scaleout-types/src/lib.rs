//! Shared value types for scale-out link discovery.
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses
//! - [`IpPrefix`]: an interface address with its prefix length (CIDR notation)
//! - [`AdminState`]: administrative up/down state of a kernel link

mod admin;
mod ip;
mod mac;

pub use admin::AdminState;
pub use ip::IpPrefix;
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
