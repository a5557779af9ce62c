//! Link event and administrative command dispatch.

use tracing::{debug, info};

use crate::port::{AdminCommand, Port, PortError};
use crate::transport::{LinkDriver, LinkEvent};

impl<D: LinkDriver> Port<D> {
    /// Process one link event and everything it triggers.
    pub fn handle_link_event(&mut self, event: LinkEvent, now_ms: u64) {
        self.dispatch_link_event(event, now_ms);
        self.run_deferred(now_ms);
    }

    fn dispatch_link_event(&mut self, event: LinkEvent, now_ms: u64) {
        match event {
            LinkEvent::LinkUp => self.on_link_up(now_ms),
            LinkEvent::LinkDown => self.on_link_down(now_ms),
            LinkEvent::Completion { id, completion } => {
                self.complete_exchange(id, completion, now_ms)
            }
            LinkEvent::Inbound(els) => {
                if self.unloading {
                    debug!(sid = %els.sid, "Inbound ELS dropped, port shutting down");
                    return;
                }
                self.handle_inbound(els, now_ms)
            }
            LinkEvent::LoginRegistered { node, did, result } => {
                self.login_registered(node, did, result, now_ms)
            }
            LinkEvent::NameServerEntries(dids) => {
                if !self.link_up {
                    debug!("Name server entries dropped, link down");
                    return;
                }
                self.name_server_entries(dids, now_ms)
            }
        }
    }

    /// Process work produced while handling an event: synthetic
    /// completions and discovery rescans.
    pub(crate) fn run_deferred(&mut self, now_ms: u64) {
        loop {
            if let Some(event) = self.deferred.pop_front() {
                self.dispatch_link_event(event, now_ms);
                continue;
            }
            if self.discovery_kick {
                self.discovery_kick = false;
                self.continue_discovery(now_ms);
                continue;
            }
            break;
        }
    }

    /// Apply an administrative command.
    pub fn handle_admin(&mut self, command: AdminCommand, now_ms: u64) -> Result<(), PortError> {
        info!(command = ?command, "Admin command");
        match command {
            AdminCommand::StartDiscovery => self.start_discovery(now_ms),
            AdminCommand::ForceRelogin(did) => self.force_relogin(did, now_ms),
            AdminCommand::RemoveNode(did) => self.remove_node(did, now_ms),
            AdminCommand::Shutdown => {
                self.shutdown(now_ms);
                Ok(())
            }
        }
    }
}
