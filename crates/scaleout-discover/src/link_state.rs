//! Administrative link state changes with kernel confirmation.
//!
//! Each pass subscribes to link notifications before issuing any request,
//! then waits for every requested link to be reported back. A single
//! deadline covers the whole pass, so one silent link delays the verdict
//! for all of them.

use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::error::{DiscoverError, Result};
use crate::link::LinkRegistry;
use crate::netlink::{LinkEvents, LinkManager};

/// Deadline for a whole pass of link state confirmations.
pub const LINK_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Drives links up at start and restores their original state at exit.
pub struct LinkStateSync<'a> {
    manager: &'a dyn LinkManager,
    timeout: Duration,
}

impl<'a> LinkStateSync<'a> {
    pub fn new(manager: &'a dyn LinkManager) -> Self {
        Self {
            manager,
            timeout: LINK_RESPONSE_TIMEOUT,
        }
    }

    /// Overrides the confirmation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Brings every administratively down link up.
    ///
    /// Links whose request fails are logged and not waited on. On timeout
    /// the links that did confirm keep their new state.
    #[instrument(skip_all, fields(links = registry.len()))]
    pub async fn interfaces_up(&self, registry: &mut LinkRegistry) -> Result<()> {
        let mut events = self.manager.subscribe().await?;

        for link in registry.iter_mut() {
            link.set_expect_response(false);
            if link.current_state().is_up() {
                continue;
            }

            match self.manager.set_up(link.kernel_link()).await {
                Ok(()) => {
                    debug!(ifname = %link.name(), "Requested link up");
                    link.set_expect_response(true);
                }
                Err(e) => warn!(ifname = %link.name(), error = %e, "Cannot set link up"),
            }
        }

        self.wait_link_response(&mut events, registry).await
    }

    /// Sets links back down that were down at discovery and are up now.
    ///
    /// Links found up at discovery are never touched. A failed
    /// subscription does not stop the down requests; its error is
    /// returned afterwards.
    #[instrument(skip_all, fields(links = registry.len()))]
    pub async fn interfaces_restore_down(&self, registry: &mut LinkRegistry) -> Result<()> {
        let subscription = self.manager.subscribe().await;
        if let Err(e) = &subscription {
            warn!(error = %e, "Cannot subscribe to link notifications");
        }

        for link in registry.iter_mut() {
            link.set_expect_response(false);
            if !(link.original_state().is_down() && link.current_state().is_up()) {
                continue;
            }

            match self.manager.set_down(link.kernel_link()).await {
                Ok(()) => {
                    info!(ifname = %link.name(), "Setting link back down");
                    link.set_expect_response(subscription.is_ok());
                }
                Err(e) => warn!(ifname = %link.name(), error = %e, "Cannot set link back down"),
            }
        }

        let mut events = subscription?;
        self.wait_link_response(&mut events, registry).await
    }

    async fn wait_link_response(
        &self,
        events: &mut LinkEvents,
        registry: &mut LinkRegistry,
    ) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        while !registry.all_confirmed() {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(update)) => {
                    registry.confirm(update);
                }
                Ok(None) => {
                    let pending = registry.pending();
                    registry.clear_expectations();
                    return Err(DiscoverError::EventStreamClosed { pending });
                }
                Err(_) => {
                    let pending = registry.pending();
                    registry.clear_expectations();
                    return Err(DiscoverError::LinkWaitTimeout {
                        pending,
                        waited: self.timeout,
                    });
                }
            }
        }

        debug!("All link changes confirmed");
        Ok(())
    }
}
