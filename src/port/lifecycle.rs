//! Link state changes, administrative operations and shutdown.

use tracing::{debug, info, warn};

use super::{Port, PortError, PortState};
use crate::exchange::{ElsRequest, ExchangeId, LogoFollowup};
use crate::identity::Did;
use crate::protocol::{Completion, CompletionStatus, ElsCommand, LocalReject};
use crate::registry::{NodeEvent, NodeHandle, NodeState};
use crate::transport::LinkDriver;

impl<D: LinkDriver> Port<D> {
    // === Link ===

    pub(crate) fn on_link_up(&mut self, now_ms: u64) {
        if self.unloading {
            debug!("Link up ignored, port shutting down");
            return;
        }
        if self.link_up {
            debug!("Link already up");
            return;
        }
        info!(wwpn = %self.wwpn, "Link up");

        self.link_up = true;
        self.window.reset();
        self.window.is_loop = !self.driver.loop_map().is_empty();
        self.state = PortState::Init;
        self.start_fabric_login(now_ms);
    }

    pub(crate) fn on_link_down(&mut self, now_ms: u64) {
        if !self.link_up {
            debug!("Link already down");
            return;
        }
        info!(wwpn = %self.wwpn, "Link down");

        self.link_up = false;
        self.state = PortState::LinkDown;
        self.abort_all(LocalReject::LinkDown, now_ms);

        let use_adisc = self.config.discovery.use_adisc;
        for node in self.registry.handles() {
            self.cancel_delayed_retry(node);
            let (did, state) = match self.registry.get(node) {
                Ok(n) => (n.did, n.state),
                Err(_) => continue,
            };

            if did.is_well_known() {
                self.unregister_node_login(node);
                if let Ok(n) = self.registry.get_mut(node) {
                    n.set_state(NodeState::NotPresent);
                    n.flags.clear_pending();
                }
            } else if state.is_logged_in() {
                self.apply_event(node, NodeEvent::DeviceRecovery { use_adisc }, None, now_ms);
            } else if state.is_login_in_progress() {
                if let Ok(n) = self.registry.get_mut(node) {
                    n.set_state(NodeState::NotPresent);
                    n.flags.discovery_pending = true;
                }
            }
        }

        self.reset_fabric_state();
        self.my_did = Did::UNASSIGNED;
    }

    /// Finish every outstanding exchange with a synthetic local reject.
    fn abort_all(&mut self, reason: LocalReject, now_ms: u64) {
        let mut ids: Vec<_> = self.exchanges.keys().copied().collect();
        ids.sort();
        if !ids.is_empty() {
            debug!(count = ids.len(), reason = ?reason, "Aborting outstanding exchanges");
        }
        for id in ids {
            if let Err(e) = self.driver.abort_exchange(id) {
                debug!(id = %id, error = %e, "Driver abort failed");
            }
            self.complete_exchange(
                id,
                Completion::failed(CompletionStatus::LocalReject(reason)),
                now_ms,
            );
        }
        self.aborted.clear();
    }

    fn reset_fabric_state(&mut self) {
        let dropped = self.gate.reset();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Fabric gate reset");
        }
        self.queued_sends.clear();
        if let Some(token) = self.gate_timer.take() {
            self.timers.cancel(token);
        }
        self.window.reset();
        self.discovery_kick = false;
    }

    // === Administrative Operations ===

    /// Run a discovery pass now. Before a fabric login has completed this
    /// restarts fabric login instead.
    pub fn start_discovery(&mut self, now_ms: u64) -> Result<(), PortError> {
        self.check_usable()?;

        if !self.state.is_logged_in() {
            if self.state != PortState::FlogiIssued {
                self.start_fabric_login(now_ms);
            }
        } else if self.window.is_active() {
            debug!("Discovery already running");
        } else if self.window.is_fabric {
            self.window.set_ns_query_pending(true);
            if let Err(e) = self.driver.query_name_server() {
                warn!(error = %e, "Name server query failed");
                self.window.set_ns_query_pending(false);
                self.discovery_start(now_ms);
            }
        } else {
            self.discovery_start(now_ms);
        }

        self.run_deferred(now_ms);
        Ok(())
    }

    /// Log out of a node and log in again.
    pub fn force_relogin(&mut self, did: Did, now_ms: u64) -> Result<(), PortError> {
        self.check_usable()?;
        let node = self.find_node(did)?;
        let state = self.registry.get(node)?.state;

        let result = if state.is_logged_in() {
            self.issue_els(node, ElsRequest::Logo(LogoFollowup::Relogin), 0, false, now_ms)
        } else if state == NodeState::NotPresent {
            self.drop_delayed_retry(node);
            self.issue_els(node, ElsRequest::Plogi, 0, false, now_ms)
        } else {
            Err(PortError::LoginInProgress(did))
        };

        self.run_deferred(now_ms);
        result.map(|id| debug!(did = %did, id = %id, "Relogin started"))
    }

    /// Send a command outside the login sequence to a known node. The
    /// outcome is logged; a failure is retried like any other exchange.
    pub fn send_els(
        &mut self,
        did: Did,
        command: ElsCommand,
        expects_response: bool,
        now_ms: u64,
    ) -> Result<ExchangeId, PortError> {
        self.check_usable()?;
        let node = self.find_node(did)?;
        let request = ElsRequest::Generic {
            command,
            expects_response,
        };
        let result = self.issue_els(node, request, 0, false, now_ms);
        self.run_deferred(now_ms);
        result
    }

    /// Log out of a node and forget it.
    pub fn remove_node(&mut self, did: Did, now_ms: u64) -> Result<(), PortError> {
        let node = self.find_node(did)?;
        let state = self.registry.get(node)?.state;

        let logo = state.is_logged_in() && self.link_up && !self.unloading;
        let sent = logo
            && match self.issue_els(node, ElsRequest::Logo(LogoFollowup::Remove), 0, false, now_ms)
            {
                Ok(_) => true,
                Err(e) => {
                    debug!(did = %did, error = %e, "LOGO not sent, removing locally");
                    false
                }
            };
        if !sent {
            self.remove_node_handle(node, now_ms);
        }

        self.run_deferred(now_ms);
        Ok(())
    }

    /// Tear the port down. Outstanding exchanges are aborted and every
    /// node is removed; afterwards no node reference remains.
    pub fn shutdown(&mut self, now_ms: u64) {
        if self.unloading {
            return;
        }
        info!(wwpn = %self.wwpn, "Port shutting down");

        self.unloading = true;
        self.link_up = false;
        self.abort_all(LocalReject::Aborted, now_ms);

        for node in self.registry.handles() {
            self.cancel_delayed_retry(node);
            self.cancel_registration(node);
            self.remove_node_handle(node, now_ms);
        }

        self.reset_fabric_state();
        self.timers.clear();
        self.deadline_timers.clear();
        self.run_deferred(now_ms);
        self.deferred.clear();

        self.state = PortState::LinkDown;
        self.my_did = Did::UNASSIGNED;
        self.session = None;
        info!(remaining = self.registry.live_count(), "Port shut down");
    }

    /// Drop the reference held by a pending login registration. Its
    /// answer, if it still arrives, is treated as stale.
    fn cancel_registration(&mut self, node: NodeHandle) {
        let pending = match self.registry.get_mut(node) {
            Ok(n) if n.flags.register_in_progress => {
                n.flags.register_in_progress = false;
                n.register_did = None;
                true
            }
            _ => false,
        };
        if pending {
            self.release_node(node);
        }
    }

    fn check_usable(&self) -> Result<(), PortError> {
        if self.unloading {
            return Err(PortError::ShuttingDown);
        }
        if !self.link_up {
            return Err(PortError::LinkDown);
        }
        Ok(())
    }

    fn find_node(&self, did: Did) -> Result<NodeHandle, PortError> {
        self.registry.find(did).ok_or(PortError::NodeNotFound(did))
    }
}
