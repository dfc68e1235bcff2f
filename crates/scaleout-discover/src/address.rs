//! Point-to-point address configuration.

use scaleout_types::IpPrefix;
use std::net::IpAddr;
use tracing::{info, instrument, warn};

use crate::error::{FailurePolicy, Result};
use crate::link::{LinkRegistry, NetworkLink};
use crate::netlink::{AddressFamily, LinkManager};

/// Outcome of an address configuration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressReport {
    /// Links that carry their derived address after the pass.
    pub configured: usize,
    /// Links with a resolved peer, i.e. eligible for configuration.
    pub total: usize,
}

impl AddressReport {
    /// True if every eligible link is configured.
    pub fn is_complete(&self) -> bool {
        self.configured == self.total
    }
}

/// Adds the derived /30 address to every link with a resolved peer.
pub struct AddressConfigurator<'a> {
    manager: &'a dyn LinkManager,
}

impl<'a> AddressConfigurator<'a> {
    /// A failing link never stops the others.
    pub const POLICY: FailurePolicy = FailurePolicy::ContinueOnError;

    pub fn new(manager: &'a dyn LinkManager) -> Self {
        Self { manager }
    }

    /// Configures all eligible links. Links that already carry their
    /// address are counted without a change.
    #[instrument(skip_all)]
    pub async fn configure_interfaces(&self, registry: &LinkRegistry) -> Result<AddressReport> {
        info!("Configuring interfaces...");

        let mut report = AddressReport::default();
        for link in registry.iter() {
            let Some(local) = link.local_prefix() else {
                continue;
            };
            report.total += 1;

            match self.configure_link(link, &local).await {
                Ok(()) => report.configured += 1,
                Err(e) => {
                    warn!(ifname = %link.name(), addr = %local, error = %e, "Could not configure address");
                    Self::POLICY.on_error(e)?;
                }
            }
        }

        info!(
            configured = report.configured,
            total = report.total,
            "Interface configuration done"
        );
        Ok(report)
    }

    async fn configure_link(&self, link: &NetworkLink, local: &IpPrefix) -> Result<()> {
        let existing = self
            .manager
            .addr_list(link.kernel_link(), AddressFamily::V4)
            .await?;

        let wanted: IpAddr = local.address();
        if let Some(addr) = existing.iter().find(|addr| addr.address() == wanted) {
            info!(ifname = %link.name(), addr = %addr, "Interface already configured");
            return Ok(());
        }

        self.manager.addr_add(link.kernel_link(), local).await?;
        info!(ifname = %link.name(), addr = %local, "Configured address");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_complete() {
        assert!(AddressReport::default().is_complete());
        assert!(
            AddressReport {
                configured: 2,
                total: 2
            }
            .is_complete()
        );
        assert!(
            !AddressReport {
                configured: 1,
                total: 2
            }
            .is_complete()
        );
    }

    #[test]
    fn test_policy_is_continue_on_error() {
        assert_eq!(AddressConfigurator::POLICY, FailurePolicy::ContinueOnError);
    }
}
