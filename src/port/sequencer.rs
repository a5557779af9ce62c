//! Fabric login sequencer: FLOGI/FDISC, point-to-point negotiation, loop
//! fallback and the name-server login that seeds fabric discovery.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use super::{FabricSession, Port, PortEvent, PortState};
use crate::exchange::{ElsRequest, Exchange};
use crate::identity::{Did, Wwn};
use crate::protocol::{
    Completion, CompletionStatus, LocalReject, ResponsePayload, ServiceParams,
};
use crate::registry::{NodeEvent, NodeState};
use crate::retry::RetryAction;
use crate::transport::LinkDriver;

impl<D: LinkDriver> Port<D> {
    /// Send FLOGI (FDISC for a virtual port) to the fabric.
    pub(crate) fn start_fabric_login(&mut self, now_ms: u64) {
        let request = if self.is_virtual() {
            ElsRequest::Fdisc
        } else {
            ElsRequest::Flogi
        };
        self.send_fabric_login(request, now_ms);
    }

    fn send_fabric_login(&mut self, request: ElsRequest, now_ms: u64) {
        let fabric = match self.registry.find_or_create(Did::FABRIC) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "No node for the fabric");
                self.state = PortState::Failed;
                return;
            }
        };
        if let Ok(n) = self.registry.get_mut(fabric) {
            n.set_state(NodeState::NotPresent);
        }

        self.state = PortState::FlogiIssued;
        info!(request = %request, wwpn = %self.wwpn, "Starting fabric login");

        if let Err(e) = self.issue_els(fabric, request, 0, false, now_ms) {
            warn!(request = %request, error = %e, "Fabric login not sent");
            self.state = if self.link_up {
                PortState::Failed
            } else {
                PortState::LinkDown
            };
        }
    }

    pub(crate) fn fabric_login_complete(
        &mut self,
        exchange: &Exchange,
        completion: Completion,
        now_ms: u64,
    ) {
        if self.state != PortState::FlogiIssued {
            debug!(state = %self.state, "Stale fabric login completion");
            return;
        }

        match (completion.status, completion.response) {
            (
                CompletionStatus::Accept,
                ResponsePayload::Flogi {
                    params,
                    assigned_did,
                },
            ) => {
                if params.fabric_port && exchange.request == ElsRequest::Flogi && self.is_virtual()
                {
                    // The fabric session is back; the virtual address is
                    // requested again.
                    info!(fabric = %params.wwpn, "Fabric login restored, resending FDISC");
                    self.record_fabric_params(params);
                    self.send_fabric_login(ElsRequest::Fdisc, now_ms);
                } else if params.fabric_port {
                    self.fabric_accepted(params, assigned_did, now_ms);
                } else {
                    self.record_fabric_params(params);
                    self.point_to_point(params.wwpn, now_ms);
                }
            }
            (CompletionStatus::Accept, _) => {
                warn!("Fabric login accept without service parameters");
                let status = CompletionStatus::LocalReject(LocalReject::IllegalFrame);
                self.fabric_login_failed(exchange, status, now_ms);
            }
            (status, _) => self.fabric_login_failed(exchange, status, now_ms),
        }
    }

    fn record_fabric_params(&mut self, params: ServiceParams) {
        if let Some(fabric) = self.registry.find(Did::FABRIC) {
            if let Ok(n) = self.registry.get_mut(fabric) {
                n.wwpn = params.wwpn;
                n.wwnn = params.wwnn;
                n.service_params = Some(params);
            }
        }
    }

    // === Switched Fabric ===

    fn fabric_accepted(&mut self, params: ServiceParams, assigned_did: Did, now_ms: u64) {
        let session = FabricSession {
            did: assigned_did,
            fabric_wwpn: params.wwpn,
            fabric_wwnn: params.wwnn,
        };
        let changed = self
            .session
            .is_some_and(|prev| prev != session || !params.clean_address);
        if changed && !params.clean_address {
            debug!(did = %assigned_did, "Fabric did not guarantee a clean address");
        }

        info!(
            did = %assigned_did,
            fabric = %params.wwpn,
            changed,
            "Fabric login accepted"
        );

        self.my_did = assigned_did;
        self.session = Some(session);
        self.window.is_fabric = true;
        self.window.is_point_to_point = false;
        self.state = PortState::FabricLoginInProgress;

        self.record_fabric_params(params);
        if let Some(fabric) = self.registry.find(Did::FABRIC) {
            if let Ok(n) = self.registry.get_mut(fabric) {
                n.set_state(NodeState::Unmapped);
            }
        }

        self.emit(PortEvent::TopologyChanged {
            is_fabric: true,
            is_point_to_point: false,
        });

        self.rediscover_all(changed, now_ms);
        self.login_name_server(now_ms);
    }

    /// Prepare known nodes for the discovery pass that follows a fabric
    /// login. With `relogin` every login is dropped. Otherwise logins stay
    /// registered, and are revalidated with ADISC when configured.
    fn rediscover_all(&mut self, relogin: bool, now_ms: u64) {
        let use_adisc = self.config.discovery.use_adisc;
        if !relogin && !use_adisc {
            return;
        }
        let nodes: Vec<_> = self
            .registry
            .iter()
            .filter(|(_, n)| !n.did.is_well_known())
            .map(|(h, n)| (h, n.state, n.flags.adisc_pending))
            .collect();

        for (node, state, adisc_pending) in nodes {
            if relogin && (state.is_logged_in() || adisc_pending) {
                self.unregister_node_login(node);
                self.notify_removed(node);
                if let Ok(n) = self.registry.get_mut(node) {
                    n.set_state(NodeState::NotPresent);
                    n.flags.adisc_pending = false;
                    n.flags.discovery_pending = true;
                }
            } else if !relogin && state.is_logged_in() {
                self.apply_event(node, NodeEvent::DeviceRecovery { use_adisc }, None, now_ms);
            }
        }
    }

    fn login_name_server(&mut self, now_ms: u64) {
        let ns = match self.registry.find_or_create(Did::NAME_SERVER) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "No node for the name server");
                self.discovery_start(now_ms);
                return;
            }
        };

        self.abort_login(ns);
        self.unregister_node_login(ns);
        if let Ok(n) = self.registry.get_mut(ns) {
            n.set_state(NodeState::NotPresent);
        }

        self.window.set_ns_query_pending(true);
        if let Err(e) = self.issue_els(ns, ElsRequest::Plogi, 0, false, now_ms) {
            warn!(error = %e, "Name server login not sent");
            self.window.set_ns_query_pending(false);
            self.discovery_start(now_ms);
        }
    }

    /// Name-server login registered: subscribe to state changes and fetch
    /// the port list.
    pub(crate) fn name_server_ready(&mut self, now_ms: u64) {
        match self.registry.find_or_create(Did::FABRIC_CONTROLLER) {
            Ok(controller) => {
                if let Err(e) = self.issue_els(controller, ElsRequest::Scr, 0, false, now_ms) {
                    warn!(error = %e, "SCR not sent");
                }
            }
            Err(e) => warn!(error = %e, "No node for the fabric controller"),
        }

        self.window.set_ns_query_pending(true);
        if let Err(e) = self.driver.query_name_server() {
            warn!(error = %e, "Name server query failed");
            self.window.set_ns_query_pending(false);
            self.discovery_start(now_ms);
        }
    }

    /// Seed discovery from the name server's port list.
    pub(crate) fn name_server_entries(&mut self, dids: Vec<Did>, now_ms: u64) {
        if !self.window.ns_query_pending() {
            debug!(count = dids.len(), "Unsolicited name server entries");
        }
        self.window.set_ns_query_pending(false);
        debug!(count = dids.len(), "Name server entries");

        for &did in &dids {
            if did.is_well_known() || did == self.my_did {
                continue;
            }
            let node = match self.registry.find_or_create(did) {
                Ok(h) => h,
                Err(e) => {
                    warn!(did = %did, error = %e, "No node for name server entry");
                    continue;
                }
            };
            if let Ok(n) = self.registry.get_mut(node) {
                if n.state == NodeState::NotPresent
                    && !n.flags.adisc_pending
                    && !n.flags.delayed_retry_armed
                {
                    n.flags.discovery_pending = true;
                }
            }
        }

        // Ports the fabric no longer lists are not worth a PLOGI.
        for node in self.registry.handles() {
            if let Ok(n) = self.registry.get_mut(node) {
                if n.state == NodeState::NotPresent
                    && !n.did.is_well_known()
                    && !dids.contains(&n.did)
                {
                    n.flags.clear_pending();
                }
            }
        }

        self.discovery_start(now_ms);
    }

    // === Point-to-Point ===

    /// Resolve point-to-point addressing by port name.
    pub(crate) fn point_to_point(&mut self, peer_wwpn: Wwn, now_ms: u64) {
        self.window.is_fabric = false;
        self.window.is_point_to_point = true;

        match self.wwpn.cmp(&peer_wwpn) {
            Ordering::Equal => {
                warn!(wwpn = %peer_wwpn, "Peer has our port name, link looped back");
                self.state = PortState::Failed;
                return;
            }
            Ordering::Greater => {
                info!(peer = %peer_wwpn, "Point-to-point, logging in to peer");
                self.my_did = Did::PT2PT_LOCAL;
                self.state = PortState::PointToPointNegotiation;
                self.emit(PortEvent::TopologyChanged {
                    is_fabric: false,
                    is_point_to_point: true,
                });
                match self.registry.find_or_create(Did::PT2PT_REMOTE) {
                    Ok(peer) => {
                        if let Ok(n) = self.registry.get_mut(peer) {
                            if n.state == NodeState::NotPresent {
                                n.flags.discovery_pending = true;
                            }
                        }
                        self.discovery_start(now_ms);
                    }
                    Err(e) => warn!(error = %e, "No node for point-to-point peer"),
                }
            }
            Ordering::Less => {
                info!(peer = %peer_wwpn, "Point-to-point, waiting for peer login");
                self.my_did = Did::PT2PT_REMOTE;
                self.state = PortState::PointToPointNegotiation;
                self.emit(PortEvent::TopologyChanged {
                    is_fabric: false,
                    is_point_to_point: true,
                });
            }
        }
    }

    // === Failure ===

    fn fabric_login_failed(&mut self, exchange: &Exchange, status: CompletionStatus, now_ms: u64) {
        let action = self.retry_or_fail(exchange, status, now_ms);
        match action {
            RetryAction::RetryNow | RetryAction::RetryAfter(_) => {}
            RetryAction::ResetLink => {
                warn!(status = %status, "Fabric login failing, resetting link");
                self.emit(PortEvent::LinkReset);
                if let Err(e) = self.driver.reset_link() {
                    warn!(error = %e, "Link reset failed");
                    self.state = PortState::Failed;
                }
            }
            RetryAction::RestartLogin => {
                info!(status = %status, "Fabric requires a new login, restarting at FLOGI");
                self.send_fabric_login(ElsRequest::Flogi, now_ms);
            }
            RetryAction::GiveUp => {
                if self.window.is_loop {
                    self.loop_discovery(now_ms);
                } else {
                    warn!(status = %status, "Fabric login failed");
                    self.state = PortState::Failed;
                }
            }
        }
    }

    /// No fabric answered on a loop: discover the ports in the loop map.
    fn loop_discovery(&mut self, now_ms: u64) {
        let map = self.driver.loop_map();
        info!(ports = map.len(), "Fabric login gave up, discovering loop");
        self.state = PortState::LoopDiscovery;
        self.emit(PortEvent::TopologyChanged {
            is_fabric: false,
            is_point_to_point: false,
        });

        for did in map {
            if did == self.my_did || did.is_well_known() {
                continue;
            }
            match self.registry.find_or_create(did) {
                Ok(node) => {
                    if let Ok(n) = self.registry.get_mut(node) {
                        if n.state == NodeState::NotPresent && !n.flags.adisc_pending {
                            n.flags.discovery_pending = true;
                        }
                    }
                }
                Err(e) => warn!(did = %did, error = %e, "No node for loop port"),
            }
        }
        self.discovery_start(now_ms);
    }
}
