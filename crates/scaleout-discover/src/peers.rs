//! Peer data from the local LLDP agent.
//!
//! Neighbor TLVs are read from the agent's database with `lldptool -t -n`;
//! nothing here speaks LLDP itself.

use async_trait::async_trait;
use scaleout_types::MacAddress;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::link::LinkRegistry;
use crate::pfc::LldpTool;

/// Delay between two polls of the LLDP agent.
pub const PEER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Neighbor data known for one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Port Description TLV of the peer.
    pub port_description: Option<String>,
    /// Chassis ID of the peer, when it is a MAC address.
    pub chassis_mac: Option<MacAddress>,
}

/// Source of neighbor data per interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerSource: Send + Sync {
    /// Returns what is currently known about the peer of `ifname`.
    async fn peer(&self, ifname: &str) -> Result<PeerInfo>;
}

/// Reads neighbor TLVs through lldptool.
#[derive(Debug, Clone)]
pub struct LldptoolPeerSource {
    tool: LldpTool,
}

impl LldptoolPeerSource {
    pub fn new(tool: LldpTool) -> Self {
        Self { tool }
    }

    async fn neighbor_tlv(&self, ifname: &str, tlv: &str) -> Result<String> {
        self.tool.run(&["-t", "-n", "-i", ifname, "-V", tlv]).await
    }
}

#[async_trait]
impl PeerSource for LldptoolPeerSource {
    async fn peer(&self, ifname: &str) -> Result<PeerInfo> {
        let description = self.neighbor_tlv(ifname, "portDesc").await?;
        let chassis = self.neighbor_tlv(ifname, "chassisID").await?;

        Ok(PeerInfo {
            port_description: tlv_value(&description).map(str::to_string),
            chassis_mac: tlv_value(&chassis).and_then(parse_chassis_mac),
        })
    }
}

/// Returns the first value line of a TLV dump, skipping the TLV title.
///
/// ```text
/// Port Description TLV
///         swp1 10.20.0.1/30
/// ```
fn tlv_value(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.ends_with("TLV"))
}

/// Parses a `MAC: xx:xx:xx:xx:xx:xx` chassis ID value.
fn parse_chassis_mac(value: &str) -> Option<MacAddress> {
    value.strip_prefix("MAC:")?.trim().parse().ok()
}

/// Polls `source` for links without a resolved peer until every link is
/// resolved or `wait` has passed.
///
/// Returns true if at least one link has a resolved peer.
pub async fn collect_peers(
    source: &dyn PeerSource,
    registry: &mut LinkRegistry,
    wait: Duration,
    interval: Duration,
) -> bool {
    // A wait too large to represent never expires.
    let deadline = Instant::now().checked_add(wait);

    loop {
        let pending: Vec<String> = registry
            .iter()
            .filter(|link| link.resolved().is_none())
            .map(|link| link.name().to_string())
            .collect();

        for ifname in pending {
            let info = match source.peer(&ifname).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(ifname = %ifname, error = %e, "No peer data yet");
                    continue;
                }
            };
            let Some(link) = registry.get_mut(&ifname) else {
                continue;
            };
            if info.chassis_mac.is_some() {
                link.set_peer_hw_addr(info.chassis_mac);
            }
            if let Some(description) = info.port_description {
                link.set_port_description(description);
            }
        }

        registry.resolve_peers();

        if registry.all_resolved() {
            break;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => interval,
        };
        if remaining.is_zero() {
            break;
        }
        sleep(interval.min(remaining)).await;
    }

    let resolved = registry.resolved_count();
    if resolved == 0 {
        warn!(links = registry.len(), "No peers found");
    } else {
        info!(resolved, links = registry.len(), "Peers found");
    }
    resolved > 0
}
