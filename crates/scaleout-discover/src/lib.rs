//! Scale-out NIC discovery and link configuration.
//!
//! Discovers the scale-out network interfaces of the accelerator cards,
//! brings them up, derives point-to-point /30 addresses from the peer
//! port descriptions published by the local LLDP agent, applies PFC and
//! exports per-interface traffic counters for Prometheus.

pub mod address;
pub mod config;
pub mod devices;
pub mod error;
pub mod exec;
pub mod gaudinet;
pub mod link;
pub mod link_state;
pub mod metrics;
pub mod metrics_server;
pub mod netlink;
pub mod peers;
pub mod pfc;
pub mod resolver;
pub mod stats;

pub use address::{AddressConfigurator, AddressReport};
pub use config::{Args, Config, FileConfig, Mode};
pub use devices::DeviceEnumerator;
pub use error::*;
pub use gaudinet::{GaudinetFile, NicNetConfig};
pub use link::{LinkRegistry, NetworkLink};
pub use link_state::{LINK_RESPONSE_TIMEOUT, LinkStateSync};
pub use metrics::NetworkExporter;
pub use metrics_server::{MetricsServer, MetricsServerConfig, spawn_metrics_server};
pub use netlink::{AddressFamily, KernelLink, LinkAddress, LinkEvents, LinkManager};
#[cfg(target_os = "linux")]
pub use netlink::RtnetlinkManager;
pub use peers::{LldptoolPeerSource, PeerInfo, PeerSource, collect_peers};
pub use pfc::{LldpTool, PfcController, PfcPriorities, verify_pfc_argument};
pub use resolver::{ResolvedPeer, resolve_mask30};
pub use stats::{EthtoolStats, StatsSource};
