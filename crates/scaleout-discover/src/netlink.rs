//! Kernel link management capability.
//!
//! The engine only talks to the kernel through [`LinkManager`]. The Linux
//! implementation drives rtnetlink over a route netlink socket; tests use a
//! scripted implementation.

use async_trait::async_trait;
use scaleout_types::{AdminState, IpPrefix, MacAddress};
use std::fmt;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Snapshot of a kernel link, used as the handle for all link requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLink {
    /// Kernel interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Administrative state (`IFF_UP`).
    pub admin_state: AdminState,
    /// Hardware address, if the link has an Ethernet address.
    pub hw_addr: Option<MacAddress>,
}

impl fmt::Display for KernelLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {}, {})", self.name, self.index, self.admin_state)
    }
}

/// Address as configured on a link: an address with its prefix length.
pub type LinkAddress = IpPrefix;

/// Address family filter for address listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
    /// Every family.
    All,
}

impl AddressFamily {
    /// Returns true if `addr` belongs to this family.
    pub fn includes(&self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
            AddressFamily::All => true,
        }
    }
}

/// Stream of link change notifications.
///
/// Dropping it stops the background listener, if any.
pub struct LinkEvents {
    rx: mpsc::UnboundedReceiver<KernelLink>,
    listener: Option<JoinHandle<()>>,
}

impl LinkEvents {
    /// Wraps a channel fed by someone else.
    pub fn new(rx: mpsc::UnboundedReceiver<KernelLink>) -> Self {
        Self { rx, listener: None }
    }

    /// Wraps a channel fed by `listener`, which is aborted on drop.
    pub fn with_listener(rx: mpsc::UnboundedReceiver<KernelLink>, listener: JoinHandle<()>) -> Self {
        Self {
            rx,
            listener: Some(listener),
        }
    }

    /// Waits for the next link notification. `None` once the feed stopped.
    pub async fn recv(&mut self) -> Option<KernelLink> {
        self.rx.recv().await
    }
}

impl Drop for LinkEvents {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Kernel link management operations consumed by the engine.
#[async_trait]
pub trait LinkManager: Send + Sync {
    /// Looks up a link by interface name.
    async fn link_by_name(&self, name: &str) -> Result<KernelLink>;

    /// Lists the addresses configured on a link.
    async fn addr_list(&self, link: &KernelLink, family: AddressFamily)
        -> Result<Vec<LinkAddress>>;

    /// Adds an address to a link.
    async fn addr_add(&self, link: &KernelLink, addr: &LinkAddress) -> Result<()>;

    /// Requests the link administratively up.
    async fn set_up(&self, link: &KernelLink) -> Result<()>;

    /// Requests the link administratively down.
    async fn set_down(&self, link: &KernelLink) -> Result<()>;

    /// Subscribes to link change notifications.
    async fn subscribe(&self) -> Result<LinkEvents>;
}

#[cfg(target_os = "linux")]
pub use linux::RtnetlinkManager;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use crate::error::DiscoverError;
    use futures::{Stream, StreamExt, TryStreamExt};
    use rtnetlink::packet_core::{NetlinkMessage, NetlinkPayload};
    use rtnetlink::packet_route::RouteNetlinkMessage;
    use rtnetlink::packet_route::address::AddressAttribute;
    use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
    use rtnetlink::sys::{AsyncSocket, SocketAddr};
    use rtnetlink::{Handle, LinkUnspec, new_connection};
    use tracing::{debug, instrument, trace};

    /// Multicast group for link notifications (RTMGRP_LINK).
    const RTMGRP_LINK: u32 = 1;

    /// [`LinkManager`] over rtnetlink.
    pub struct RtnetlinkManager {
        handle: Handle,
    }

    impl RtnetlinkManager {
        /// Opens a route netlink connection. Must be called within a tokio runtime.
        pub fn new() -> Result<Self> {
            let (connection, handle, _) =
                new_connection().map_err(|e| DiscoverError::netlink("connect", e))?;
            tokio::spawn(connection);
            Ok(Self { handle })
        }

        async fn set_admin_state(&self, link: &KernelLink, up: bool) -> Result<()> {
            let builder = LinkUnspec::new_with_index(link.index);
            let message = if up {
                builder.up().build()
            } else {
                builder.down().build()
            };
            self.handle
                .link()
                .set(message)
                .execute()
                .await
                .map_err(|e| {
                    let operation = if up { "link set up" } else { "link set down" };
                    DiscoverError::netlink(operation, e)
                })
        }
    }

    pub(super) fn kernel_link(message: &LinkMessage) -> KernelLink {
        let mut name = String::new();
        let mut hw_addr = None;
        for attr in &message.attributes {
            match attr {
                LinkAttribute::IfName(ifname) => name = ifname.clone(),
                LinkAttribute::Address(bytes) => hw_addr = MacAddress::from_link_layer(bytes),
                _ => {}
            }
        }

        KernelLink {
            index: message.header.index,
            name,
            admin_state: AdminState::from_up_flag(message.header.flags.contains(LinkFlags::Up)),
            hw_addr,
        }
    }

    async fn forward_link_events<S>(mut messages: S, tx: mpsc::UnboundedSender<KernelLink>)
    where
        S: Stream<Item = (NetlinkMessage<RouteNetlinkMessage>, SocketAddr)> + Unpin,
    {
        while let Some((message, _)) = messages.next().await {
            let NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) = message.payload
            else {
                continue;
            };
            let link = kernel_link(&link);
            trace!(ifname = %link.name, state = %link.admin_state, "Link notification");
            if tx.send(link).is_err() {
                break;
            }
        }
    }

    #[async_trait]
    impl LinkManager for RtnetlinkManager {
        #[instrument(skip(self))]
        async fn link_by_name(&self, name: &str) -> Result<KernelLink> {
            let mut links = self
                .handle
                .link()
                .get()
                .match_name(name.to_string())
                .execute();
            match links.try_next().await {
                Ok(Some(message)) => Ok(kernel_link(&message)),
                Ok(None) => Err(DiscoverError::LinkNotFound(name.to_string())),
                Err(e) => Err(DiscoverError::netlink("link get", e)),
            }
        }

        #[instrument(skip(self, link), fields(ifname = %link.name))]
        async fn addr_list(
            &self,
            link: &KernelLink,
            family: AddressFamily,
        ) -> Result<Vec<LinkAddress>> {
            let mut messages = self
                .handle
                .address()
                .get()
                .set_link_index_filter(link.index)
                .execute();

            let mut addrs = Vec::new();
            while let Some(message) = messages
                .try_next()
                .await
                .map_err(|e| DiscoverError::netlink("address get", e))?
            {
                // IFA_LOCAL is the interface's own address on point-to-point
                // links, where IFA_ADDRESS holds the peer.
                let local = message.attributes.iter().find_map(|attr| match attr {
                    AddressAttribute::Local(ip) => Some(*ip),
                    _ => None,
                });
                let address = local.or_else(|| {
                    message.attributes.iter().find_map(|attr| match attr {
                        AddressAttribute::Address(ip) => Some(*ip),
                        _ => None,
                    })
                });

                if let Some(ip) = address.filter(|ip| family.includes(ip)) {
                    addrs.push(LinkAddress::new(ip, message.header.prefix_len)
                        .map_err(|e| DiscoverError::netlink("address get", e))?);
                }
            }

            debug!(count = addrs.len(), "Listed link addresses");
            Ok(addrs)
        }

        #[instrument(skip(self, link), fields(ifname = %link.name, addr = %addr))]
        async fn addr_add(&self, link: &KernelLink, addr: &LinkAddress) -> Result<()> {
            self.handle
                .address()
                .add(link.index, addr.address(), addr.prefix_len())
                .execute()
                .await
                .map_err(|e| DiscoverError::netlink("address add", e))
        }

        async fn set_up(&self, link: &KernelLink) -> Result<()> {
            self.set_admin_state(link, true).await
        }

        async fn set_down(&self, link: &KernelLink) -> Result<()> {
            self.set_admin_state(link, false).await
        }

        async fn subscribe(&self) -> Result<LinkEvents> {
            let (mut connection, _handle, messages) =
                new_connection().map_err(|e| DiscoverError::netlink("subscribe", e))?;
            connection
                .socket_mut()
                .socket_mut()
                .bind(&SocketAddr::new(0, RTMGRP_LINK))
                .map_err(|e| DiscoverError::netlink("subscribe", e))?;

            let (tx, rx) = mpsc::unbounded_channel();
            let listener = tokio::spawn(async move {
                tokio::select! {
                    _ = connection => {}
                    _ = forward_link_events(messages, tx) => {}
                }
            });

            debug!("Subscribed to link notifications");
            Ok(LinkEvents::with_listener(rx, listener))
        }
    }
}
