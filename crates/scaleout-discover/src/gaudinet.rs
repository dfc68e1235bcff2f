//! NIC network file consumed by the accelerator runtime.
//!
//! Lists, per scale-out NIC, the local /30 address and the MAC address of
//! the peer port acting as gateway:
//!
//! ```json
//! {"NIC_NET_CONFIG":[{"NIC_MAC":"b0:fd:0b:00:00:01","NIC_IP":"10.20.0.2",
//!   "SUBNET_MASK":"255.255.255.252","GATEWAY_MAC":"b0:fd:0b:00:00:09"}]}
//! ```

use scaleout_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::link::LinkRegistry;

/// One NIC entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NicNetConfig {
    pub nic_mac: MacAddress,
    pub nic_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway_mac: MacAddress,
}

/// The whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaudinetFile {
    #[serde(rename = "NIC_NET_CONFIG")]
    pub nic_net_config: Vec<NicNetConfig>,
}

impl GaudinetFile {
    /// Collects every link with a resolved peer, a known peer MAC and a
    /// local hardware address.
    pub fn from_registry(registry: &LinkRegistry) -> Self {
        let nic_net_config = registry
            .iter()
            .filter_map(|link| {
                let local = link.local_prefix()?;
                let entry = NicNetConfig {
                    nic_mac: link.local_hw_addr()?,
                    nic_ip: local.ipv4()?,
                    subnet_mask: local.ipv4_netmask()?,
                    gateway_mac: link.peer_hw_addr()?,
                };
                Some(entry)
            })
            .collect();

        Self { nic_net_config }
    }

    pub fn is_empty(&self) -> bool {
        self.nic_net_config.is_empty()
    }

    /// Writes the file through a temporary sibling and a rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = temp_path(path);
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(
            path = %path.display(),
            nics = self.nic_net_config.len(),
            "Wrote NIC network file"
        );
        debug!(config = ?self, "NIC network file contents");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
