//! Scripted kernel link manager for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scaleout_discover::{
    AddressFamily, DiscoverError, KernelLink, LinkAddress, LinkEvents, LinkManager, Result,
};
use scaleout_types::{AdminState, MacAddress};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeState {
    links: BTreeMap<String, KernelLink>,
    addrs: HashMap<String, Vec<LinkAddress>>,
    subscribers: Vec<mpsc::UnboundedSender<KernelLink>>,
    silent: HashSet<String>,
    fail_set_up: HashSet<String>,
    fail_addr_add: HashSet<String>,
    fail_subscribe: bool,
    set_up_calls: Vec<String>,
    set_down_calls: Vec<String>,
    addr_add_calls: Vec<(String, LinkAddress)>,
}

/// In-memory kernel: state changes are applied at once and reported to
/// every subscriber unless the link is marked silent.
#[derive(Default)]
pub struct FakeLinkManager {
    state: Mutex<FakeState>,
}

impl FakeLinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a link with a hardware address derived from `index`.
    pub fn with_link(self, index: u32, name: &str, admin_state: AdminState) -> Self {
        self.state.lock().links.insert(
            name.to_string(),
            KernelLink {
                index,
                name: name.to_string(),
                admin_state,
                hw_addr: Some(MacAddress::new([0xb0, 0xfd, 0x0b, 0, 0, index as u8])),
            },
        );
        self
    }

    /// State changes of `name` are applied but never reported.
    pub fn silent(self, name: &str) -> Self {
        self.state.lock().silent.insert(name.to_string());
        self
    }

    /// Link up requests for `name` fail.
    pub fn failing_set_up(self, name: &str) -> Self {
        self.state.lock().fail_set_up.insert(name.to_string());
        self
    }

    /// Address additions on `name` fail.
    pub fn failing_addr_add(self, name: &str) -> Self {
        self.state.lock().fail_addr_add.insert(name.to_string());
        self
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    /// Drops every subscriber channel, closing their event streams.
    pub fn close_subscribers(&self) {
        self.state.lock().subscribers.clear();
    }

    pub fn admin_state(&self, name: &str) -> Option<AdminState> {
        self.state.lock().links.get(name).map(|link| link.admin_state)
    }

    pub fn addresses(&self, name: &str) -> Vec<LinkAddress> {
        self.state.lock().addrs.get(name).cloned().unwrap_or_default()
    }

    pub fn set_up_calls(&self) -> Vec<String> {
        self.state.lock().set_up_calls.clone()
    }

    pub fn set_down_calls(&self) -> Vec<String> {
        self.state.lock().set_down_calls.clone()
    }

    pub fn addr_add_count(&self) -> usize {
        self.state.lock().addr_add_calls.len()
    }

    fn change_state(&self, link: &KernelLink, admin_state: AdminState) -> Result<()> {
        let mut state = self.state.lock();
        let Some(current) = state.links.get_mut(&link.name) else {
            return Err(DiscoverError::LinkNotFound(link.name.clone()));
        };
        current.admin_state = admin_state;
        let update = current.clone();

        if !state.silent.contains(&link.name) {
            state.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl LinkManager for FakeLinkManager {
    async fn link_by_name(&self, name: &str) -> Result<KernelLink> {
        self.state
            .lock()
            .links
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoverError::LinkNotFound(name.to_string()))
    }

    async fn addr_list(&self, link: &KernelLink, family: AddressFamily) -> Result<Vec<LinkAddress>> {
        Ok(self
            .addresses(&link.name)
            .into_iter()
            .filter(|addr| family.includes(&addr.address()))
            .collect())
    }

    async fn addr_add(&self, link: &KernelLink, addr: &LinkAddress) -> Result<()> {
        let mut state = self.state.lock();
        state.addr_add_calls.push((link.name.clone(), *addr));
        if state.fail_addr_add.contains(&link.name) {
            return Err(DiscoverError::netlink("address add", "Operation not permitted"));
        }
        state.addrs.entry(link.name.clone()).or_default().push(*addr);
        Ok(())
    }

    async fn set_up(&self, link: &KernelLink) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.set_up_calls.push(link.name.clone());
            if state.fail_set_up.contains(&link.name) {
                return Err(DiscoverError::netlink("link set up", "Operation not permitted"));
            }
        }
        self.change_state(link, AdminState::Up)
    }

    async fn set_down(&self, link: &KernelLink) -> Result<()> {
        self.state.lock().set_down_calls.push(link.name.clone());
        self.change_state(link, AdminState::Down)
    }

    async fn subscribe(&self) -> Result<LinkEvents> {
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(DiscoverError::netlink("link subscribe", "No buffer space available"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(LinkEvents::new(rx))
    }
}
