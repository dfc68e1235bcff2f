//! In-memory state for every managed link.

use scaleout_types::{AdminState, IpPrefix, MacAddress};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info, warn};

use crate::config::Mode;
use crate::error::Result;
use crate::netlink::{AddressFamily, KernelLink, LinkManager};
use crate::resolver::{ResolvedPeer, resolve_mask30};

/// Placeholder for absent addresses in the link report.
const NO_ADDRESS: &str = "none";

/// State of one discovered interface.
#[derive(Debug, Clone)]
pub struct NetworkLink {
    link: KernelLink,
    original_state: AdminState,
    expect_response: bool,
    port_description: Option<String>,
    resolved: Option<ResolvedPeer>,
    peer_hw_addr: Option<MacAddress>,
    local_hw_addr: Option<MacAddress>,
}

impl NetworkLink {
    /// Captures the link as found at discovery time.
    pub fn new(link: KernelLink) -> Self {
        Self {
            original_state: link.admin_state,
            local_hw_addr: link.hw_addr,
            link,
            expect_response: false,
            port_description: None,
            resolved: None,
            peer_hw_addr: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Latest kernel view of the link.
    pub fn kernel_link(&self) -> &KernelLink {
        &self.link
    }

    /// Administrative state at discovery time.
    pub fn original_state(&self) -> AdminState {
        self.original_state
    }

    /// Administrative state as last reported by the kernel.
    pub fn current_state(&self) -> AdminState {
        self.link.admin_state
    }

    /// True while a requested state change has not been confirmed.
    pub fn expects_response(&self) -> bool {
        self.expect_response
    }

    pub(crate) fn set_expect_response(&mut self, expect: bool) {
        self.expect_response = expect;
    }

    /// Records a kernel notification for this link and clears the pending
    /// confirmation.
    pub(crate) fn confirm(&mut self, link: KernelLink) {
        self.link = link;
        self.expect_response = false;
    }

    /// Stores peer port description text to be resolved.
    pub fn set_port_description(&mut self, description: impl Into<String>) {
        self.port_description = Some(description.into());
    }

    pub fn set_peer_hw_addr(&mut self, hw_addr: Option<MacAddress>) {
        self.peer_hw_addr = hw_addr;
    }

    pub fn peer_hw_addr(&self) -> Option<MacAddress> {
        self.peer_hw_addr
    }

    /// Hardware address captured at discovery time.
    pub fn local_hw_addr(&self) -> Option<MacAddress> {
        self.local_hw_addr
    }

    pub fn resolved(&self) -> Option<&ResolvedPeer> {
        self.resolved.as_ref()
    }

    /// Address advertised by the peer, if resolution succeeded.
    pub fn peer_address(&self) -> Option<Ipv4Addr> {
        self.resolved.map(|r| r.peer)
    }

    /// Derived local address, if resolution succeeded.
    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.resolved.map(|r| r.local)
    }

    /// Derived local address with its /30 prefix length.
    pub fn local_prefix(&self) -> Option<IpPrefix> {
        self.resolved.map(|r| r.local_prefix())
    }

    /// Consumes the pending port description and resolves it.
    ///
    /// Returns `None` when no description is pending. The resolved
    /// addresses are stored on success and cleared on failure.
    pub fn resolve_peer(&mut self) -> Option<Result<ResolvedPeer>> {
        let description = self.port_description.take()?;
        let outcome = resolve_mask30(&self.link.name, &description);
        self.resolved = outcome.as_ref().ok().copied();
        Some(outcome)
    }
}

/// All managed links, keyed by interface name.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: BTreeMap<String, NetworkLink>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up every candidate interface. Names the kernel does not know
    /// are logged and skipped.
    pub async fn build<I>(manager: &dyn LinkManager, names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut registry = Self::new();
        for name in names {
            match manager.link_by_name(&name).await {
                Ok(link) => {
                    debug!(link = %link, "Registered link");
                    registry.insert(link);
                }
                Err(e) => warn!(ifname = %name, error = %e, "Link not found"),
            }
        }
        info!(count = registry.len(), "Link registry built");
        registry
    }

    /// Adds a link, replacing an earlier one with the same name.
    pub fn insert(&mut self, link: KernelLink) {
        self.links.insert(link.name.clone(), NetworkLink::new(link));
    }

    pub fn get(&self, name: &str) -> Option<&NetworkLink> {
        self.links.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NetworkLink> {
        self.links.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Interface names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkLink> {
        self.links.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NetworkLink> {
        self.links.values_mut()
    }

    /// Applies a kernel link notification. Returns false for links not
    /// managed here.
    pub fn confirm(&mut self, update: KernelLink) -> bool {
        match self.links.get_mut(&update.name) {
            Some(link) => {
                debug!(ifname = %update.name, state = %update.admin_state, "Link change confirmed");
                link.confirm(update);
                true
            }
            None => false,
        }
    }

    /// Number of links still waiting for a confirmation.
    pub fn pending(&self) -> usize {
        self.iter().filter(|l| l.expects_response()).count()
    }

    pub fn all_confirmed(&self) -> bool {
        self.pending() == 0
    }

    /// Drops every outstanding confirmation expectation.
    pub fn clear_expectations(&mut self) {
        for link in self.iter_mut() {
            link.set_expect_response(false);
        }
    }

    /// Resolves every pending peer port description.
    ///
    /// Resolution failures are logged and only exclude that link from
    /// address configuration. Returns true if any link has a resolved peer.
    pub fn resolve_peers(&mut self) -> bool {
        for link in self.iter_mut() {
            match link.resolve_peer() {
                Some(Ok(resolved)) => {
                    debug!(ifname = %link.name(), peer = %resolved.peer, local = %resolved.local, "Resolved peer");
                }
                Some(Err(e)) => warn!(ifname = %link.name(), error = %e, "Peer resolution failed"),
                None => {}
            }
        }
        self.resolved_count() > 0
    }

    /// Number of links with a resolved peer.
    pub fn resolved_count(&self) -> usize {
        self.iter().filter(|l| l.resolved().is_some()).count()
    }

    pub fn all_resolved(&self) -> bool {
        self.resolved_count() == self.len()
    }

    /// Logs per-link state, configured addresses and, in L3 mode, the
    /// peer data and the address to configure.
    pub async fn log_summary(&self, manager: &dyn LinkManager, mode: Mode) {
        for link in self.iter() {
            debug!(ifname = %link.name(), state = %link.current_state(), "Interface");

            let addrs = manager
                .addr_list(link.kernel_link(), AddressFamily::All)
                .await
                .unwrap_or_default();
            let configured = describe_addresses(&addrs, link.local_address());
            debug!(ifname = %link.name(), addresses = %configured, "Configured addresses");

            if mode == Mode::L3 {
                debug!(
                    ifname = %link.name(),
                    peer_mac = %display_or_none(link.peer_hw_addr()),
                    peer = %display_or_none(link.peer_address()),
                    local = %display_or_none(link.local_address()),
                    "Peer addressing"
                );
            }
        }
    }
}

/// Space separated addresses, marking the one that matches the local peer
/// address.
fn describe_addresses(addrs: &[IpPrefix], local: Option<Ipv4Addr>) -> String {
    if addrs.is_empty() {
        return "no addresses".to_string();
    }
    addrs
        .iter()
        .map(|addr| {
            if local.is_some_and(|local| addr.address() == IpAddr::V4(local)) {
                format!("{addr} (matches peer)")
            } else {
                addr.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_or_none<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| NO_ADDRESS.to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoverError;

    fn kernel_link(index: u32, name: &str, admin_state: AdminState) -> KernelLink {
        KernelLink {
            index,
            name: name.to_string(),
            admin_state,
            hw_addr: Some(MacAddress::new([0xb0, 0xfd, 0x0b, 0, 0, index as u8])),
        }
    }

    #[test]
    fn test_describe_addresses() {
        let addrs = [
            IpPrefix::v4(Ipv4Addr::new(10, 20, 0, 2), 30),
            "fe80::1/64".parse::<IpPrefix>().unwrap(),
        ];
        assert_eq!(
            describe_addresses(&addrs, Some(Ipv4Addr::new(10, 20, 0, 2))),
            "10.20.0.2/30 (matches peer) fe80::1/64"
        );
        assert_eq!(describe_addresses(&addrs, None), "10.20.0.2/30 fe80::1/64");
        assert_eq!(describe_addresses(&[], None), "no addresses");
        assert_eq!(display_or_none(None::<Ipv4Addr>), "none");
    }

    #[test]
    fn test_new_link_captures_original_state() {
        let mut link = NetworkLink::new(kernel_link(1, "ens1", AdminState::Down));
        assert_eq!(link.original_state(), AdminState::Down);
        assert!(!link.expects_response());

        link.set_expect_response(true);
        link.confirm(kernel_link(1, "ens1", AdminState::Up));
        assert_eq!(link.current_state(), AdminState::Up);
        assert_eq!(link.original_state(), AdminState::Down);
        assert!(!link.expects_response());
    }

    #[test]
    fn test_resolve_peer_consumes_description() {
        let mut link = NetworkLink::new(kernel_link(1, "ens1", AdminState::Up));
        assert!(link.resolve_peer().is_none());

        link.set_port_description("swp1 10.20.0.1/30");
        let resolved = link.resolve_peer().unwrap().unwrap();
        assert_eq!(resolved.local, Ipv4Addr::new(10, 20, 0, 2));
        assert_eq!(link.local_prefix().unwrap().to_string(), "10.20.0.2/30");
        assert!(link.resolve_peer().is_none());
        assert!(link.local_address().is_some());
    }

    #[test]
    fn test_failed_resolution_clears_addresses() {
        let mut link = NetworkLink::new(kernel_link(1, "ens1", AdminState::Up));
        link.set_port_description("swp1 10.20.0.1/29");
        let err = link.resolve_peer().unwrap().unwrap_err();
        assert!(matches!(err, DiscoverError::PeerMask { mask: 29, .. }));
        assert!(link.local_address().is_none());
        assert!(link.peer_address().is_none());
    }

    #[test]
    fn test_registry_resolve_peers() {
        let mut registry = LinkRegistry::new();
        registry.insert(kernel_link(1, "ens1", AdminState::Up));
        registry.insert(kernel_link(2, "ens2", AdminState::Up));
        assert!(!registry.resolve_peers());

        registry.get_mut("ens1").unwrap().set_port_description("swp1");
        registry.get_mut("ens2").unwrap().set_port_description("swp2 10.0.0.5/30");
        assert!(registry.resolve_peers());
        assert_eq!(registry.resolved_count(), 1);
        assert!(!registry.all_resolved());
        assert_eq!(
            registry.get("ens2").unwrap().local_address(),
            Some(Ipv4Addr::new(10, 0, 0, 6))
        );
    }

    #[test]
    fn test_registry_confirm_and_pending() {
        let mut registry = LinkRegistry::new();
        registry.insert(kernel_link(1, "ens1", AdminState::Down));
        registry.insert(kernel_link(2, "ens2", AdminState::Down));
        for link in registry.iter_mut() {
            link.set_expect_response(true);
        }
        assert_eq!(registry.pending(), 2);

        assert!(registry.confirm(kernel_link(1, "ens1", AdminState::Up)));
        assert!(!registry.confirm(kernel_link(9, "eth0", AdminState::Up)));
        assert_eq!(registry.pending(), 1);

        registry.clear_expectations();
        assert!(registry.all_confirmed());
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = LinkRegistry::new();
        registry.insert(kernel_link(2, "ens2", AdminState::Up));
        registry.insert(kernel_link(1, "ens1", AdminState::Up));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ens1", "ens2"]);
    }

    #[test]
    fn test_display_or_none() {
        assert_eq!(display_or_none(None::<Ipv4Addr>), "none");
        assert_eq!(display_or_none(Some(Ipv4Addr::new(10, 0, 0, 1))), "10.0.0.1");
    }
}
