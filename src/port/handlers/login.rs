//! Node state machine application: transitions, their side effects and
//! adapter login registration.

use tracing::{debug, info, trace, warn};

use super::ReplyTo;
use crate::exchange::ElsRequest;
use crate::identity::Did;
use crate::port::{Port, PortError, PortEvent, PortState};
use crate::protocol::{Completion, CompletionStatus, ElsReply, LocalReject, ServiceParams};
use crate::registry::{
    transition, Fc4Negotiation, NodeAction, NodeEvent, NodeHandle, NodeState, Release, Transition,
};
use crate::transport::{LinkDriver, LinkEvent, LoginHandle};

/// How a registration answer relates to the node it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegistrationAnswer {
    /// Answers the node's latest request at its current address.
    Current,
    /// Answers the latest request, but the node has since moved.
    Moved,
    /// A newer request replaced this one and holds its reference.
    Superseded,
    /// Nothing is pending for the node.
    Stale,
}

impl<D: LinkDriver> Port<D> {
    /// Run one state machine event on a node and apply its actions.
    /// Returns the node's state afterwards, or `None` for a stale handle.
    pub(crate) fn apply_event(
        &mut self,
        node: NodeHandle,
        event: NodeEvent,
        reply: Option<&ReplyTo>,
        now_ms: u64,
    ) -> Option<NodeState> {
        let from = self.registry.get(node).ok()?.state;
        let step = transition(from, event);
        self.apply_transition(node, from, step, reply, now_ms);
        self.registry.get(node).ok().map(|n| n.state)
    }

    pub(crate) fn apply_transition(
        &mut self,
        node: NodeHandle,
        from: NodeState,
        step: Transition,
        reply: Option<&ReplyTo>,
        now_ms: u64,
    ) {
        if step.is_noop(from) {
            trace!(node = %node, state = %from, "Stale node event ignored");
            return;
        }

        if let Ok(n) = self.registry.get_mut(node) {
            if from != step.next {
                debug!(did = %n.did, from = %from, to = %step.next, "Node state change");
            }
            n.set_state(step.next);
        }

        for action in step.actions {
            self.apply_action(node, action, reply, now_ms);
        }
    }

    fn apply_action(
        &mut self,
        node: NodeHandle,
        action: NodeAction,
        reply: Option<&ReplyTo>,
        now_ms: u64,
    ) {
        match action {
            NodeAction::AbortLogin => self.abort_login(node),
            NodeAction::UnregisterLogin => self.unregister_node_login(node),
            NodeAction::RegisterLogin => self.register_node_login(node),
            NodeAction::IssuePrli => self.start_prli(node, now_ms),
            NodeAction::Accept => {
                if let Some(r) = reply {
                    self.send_reply(ElsReply::accept(r.did, r.code, r.accept.clone()));
                }
            }
            NodeAction::Reject(rjt) => {
                if let Some(r) = reply {
                    self.send_reply(ElsReply::reject(r.did, r.code, rjt));
                }
            }
            NodeAction::NotifyMapped => self.notify_mapped(node),
            NodeAction::NotifyRemoved => self.notify_removed(node),
            NodeAction::MarkDiscoveryPending => {
                if let Ok(n) = self.registry.get_mut(node) {
                    n.flags.discovery_pending = true;
                }
            }
            NodeAction::MarkAdiscPending => {
                if let Ok(n) = self.registry.get_mut(node) {
                    n.flags.adisc_pending = true;
                }
            }
            NodeAction::ClearPending => {
                if let Ok(n) = self.registry.get_mut(node) {
                    n.flags.clear_pending();
                }
            }
            NodeAction::Remove => self.remove_from_index(node),
        }
    }

    // === Login Exchange Control ===

    /// Abort the node's outstanding login exchange and any armed delayed
    /// retry. The aborted exchange still completes once, synthetically,
    /// and only releases its reference.
    pub(crate) fn abort_login(&mut self, node: NodeHandle) {
        self.drop_delayed_retry(node);

        let id = match self.registry.get_mut(node) {
            Ok(n) => match n.login_exchange.take() {
                Some(id) => id,
                None => return,
            },
            Err(_) => return,
        };
        debug!(node = %node, id = %id, "Aborting login exchange");
        if let Err(e) = self.driver.abort_exchange(id) {
            debug!(id = %id, error = %e, "Driver abort failed");
        }
        self.aborted.insert(id);
        self.deferred.push_back(LinkEvent::Completion {
            id,
            completion: Completion::failed(CompletionStatus::LocalReject(LocalReject::Aborted)),
        });
    }

    // === Identity ===

    /// Record that `params` answered at `did`, where `node` is the node the
    /// login was processed for. Returns the node that now owns the login.
    ///
    /// A node that already carried the port name under another address is
    /// withdrawn from the upper layer before the two swap addresses, so its
    /// removal is reported under the old address.
    pub(crate) fn confirm_login(
        &mut self,
        node: NodeHandle,
        did: Did,
        params: &ServiceParams,
    ) -> Result<NodeHandle, PortError> {
        if let Some(known) = self
            .registry
            .find_by_wwpn(params.wwpn)
            .filter(|known| *known != node)
        {
            self.notify_removed(known);
            self.abort_login(known);
        }
        let renamed = match self.registry.get(node) {
            Ok(n) => !n.wwpn.is_zero() && n.wwpn != params.wwpn,
            Err(_) => false,
        };
        if renamed {
            self.notify_removed(node);
        }

        let reconciled = self.registry.plogi_confirm(did, params.wwpn, params.wwnn)?;
        for login in reconciled.stale_logins {
            self.unregister_handle(login);
        }
        if let Some(demoted) = reconciled.demoted {
            self.notify_removed(demoted);
        }
        if let Ok(n) = self.registry.get_mut(reconciled.active) {
            n.service_params = Some(*params);
        }
        Ok(reconciled.active)
    }

    // === Login Registration ===

    pub(crate) fn unregister_node_login(&mut self, node: NodeHandle) {
        let login = match self.registry.get_mut(node) {
            Ok(n) => {
                n.flags.login_registered = false;
                n.login.take()
            }
            Err(_) => None,
        };
        if let Some(login) = login {
            self.unregister_handle(login);
        }
    }

    pub(crate) fn unregister_handle(&mut self, login: LoginHandle) {
        trace!(login = %login, "Unregistering login");
        if let Err(e) = self.driver.unregister_login(login) {
            debug!(login = %login, error = %e, "Login unregister failed");
        }
    }

    /// Ask the driver to register the node's login. A pending registration
    /// holds one node reference until its answer arrives; a newer request
    /// supersedes an older one and inherits that reference.
    fn register_node_login(&mut self, node: NodeHandle) {
        let (did, params, pending) = match self.registry.get(node) {
            Ok(n) => (
                n.did,
                n.service_params
                    .unwrap_or_else(|| ServiceParams::new(n.wwpn, n.wwnn)),
                n.flags.register_in_progress,
            ),
            Err(_) => return,
        };

        if !pending && self.registry.get_ref(node).is_err() {
            return;
        }
        if let Ok(n) = self.registry.get_mut(node) {
            n.flags.register_in_progress = true;
            n.register_did = Some(did);
        }

        if let Err(e) = self.driver.register_login(node, did, &params) {
            warn!(did = %did, error = %e, "Login registration failed");
            self.deferred.push_back(LinkEvent::LoginRegistered {
                node,
                did,
                result: Err(LocalReject::NoResources),
            });
        }
    }

    /// Handle the driver's answer to a login registration.
    pub(crate) fn login_registered(
        &mut self,
        node: NodeHandle,
        did: Did,
        result: Result<LoginHandle, LocalReject>,
        now_ms: u64,
    ) {
        let answer = match self.registry.get_mut(node) {
            Ok(n) if n.flags.register_in_progress => {
                if n.register_did != Some(did) {
                    RegistrationAnswer::Superseded
                } else {
                    n.flags.register_in_progress = false;
                    n.register_did = None;
                    if n.did == did {
                        RegistrationAnswer::Current
                    } else {
                        RegistrationAnswer::Moved
                    }
                }
            }
            _ => RegistrationAnswer::Stale,
        };

        match answer {
            RegistrationAnswer::Stale | RegistrationAnswer::Superseded => {
                trace!(did = %did, answer = ?answer, "Login registration no longer wanted");
                if let Ok(handle) = result {
                    self.unregister_handle(handle);
                }
                return;
            }
            RegistrationAnswer::Moved => {
                debug!(did = %did, "Login registered under an address the node left");
                if let Ok(handle) = result {
                    self.unregister_handle(handle);
                }
                self.release_node(node);
                return;
            }
            RegistrationAnswer::Current => {}
        }

        match result {
            Ok(handle) => {
                let old = match self.registry.get_mut(node) {
                    Ok(n) => {
                        n.flags.login_registered = true;
                        n.login.replace(handle)
                    }
                    Err(_) => None,
                };
                if let Some(old) = old.filter(|old| *old != handle) {
                    self.unregister_handle(old);
                }
                debug!(did = %did, login = %handle, "Login registered");

                let event = NodeEvent::CmplRegLogin {
                    success: true,
                    fabric_service: did.is_fabric_service(),
                };
                let next = self.apply_event(node, event, None, now_ms);
                if did == Did::NAME_SERVER && next == Some(NodeState::Unmapped) {
                    self.name_server_ready(now_ms);
                }
            }
            Err(reason) => {
                warn!(did = %did, reason = ?reason, "Login registration rejected");
                let event = NodeEvent::CmplRegLogin {
                    success: false,
                    fabric_service: did.is_fabric_service(),
                };
                self.apply_event(node, event, None, now_ms);
            }
        }

        self.release_node(node);
    }

    // === PRLI Sequencing ===

    fn start_prli(&mut self, node: NodeHandle, now_ms: u64) {
        let types = self.fc4_types;
        if let Ok(n) = self.registry.get_mut(node) {
            n.fc4 = Fc4Negotiation::start(types);
        }
        if !self.issue_next_prli(node, now_ms) {
            self.prli_finish(node, now_ms);
        }
    }

    /// Send PRLI for the next FC-4 type still pending. Returns false when
    /// none was sent.
    pub(crate) fn issue_next_prli(&mut self, node: NodeHandle, now_ms: u64) -> bool {
        let next = match self.registry.get_mut(node) {
            Ok(n) => n.fc4.next_to_send(),
            Err(_) => return false,
        };
        let Some(fc4) = next else {
            return false;
        };
        match self.issue_els(node, ElsRequest::Prli(fc4), 0, false, now_ms) {
            Ok(_) => true,
            Err(e) => {
                warn!(node = %node, fc4 = %fc4, error = %e, "PRLI issue failed");
                if let Ok(n) = self.registry.get_mut(node) {
                    n.fc4.in_flight = None;
                }
                self.issue_next_prli(node, now_ms)
            }
        }
    }

    /// Settle the node once every FC-4 type had its PRLI.
    pub(crate) fn prli_finish(&mut self, node: NodeHandle, now_ms: u64) {
        let (accepted, target) = match self.registry.get(node) {
            Ok(n) => (!n.fc4.completed.is_empty(), n.fc4.target),
            Err(_) => return,
        };
        let next = self.apply_event(node, NodeEvent::CmplPrli { accepted, target }, None, now_ms);

        if next.is_some_and(|s| s.is_logged_in())
            && self.state == PortState::PointToPointNegotiation
            && !self.window.is_active()
        {
            info!("Point-to-point login complete");
            self.state = PortState::Ready;
            self.emit(PortEvent::DiscoveryComplete);
        }
    }

    // === Upper-Layer Registration ===

    /// Report a node to the upper layer. The registration holds a node
    /// reference until the node is reported removed.
    pub(crate) fn notify_mapped(&mut self, node: NodeHandle) {
        let registered = match self.registry.get(node) {
            Ok(n) => n.flags.transport_registered,
            Err(_) => return,
        };
        if registered || self.registry.get_ref(node).is_err() {
            return;
        }
        if let Ok(n) = self.registry.get_mut(node) {
            n.flags.transport_registered = true;
            let event = PortEvent::NodeMapped {
                did: n.did,
                wwpn: n.wwpn,
                fc4: n.fc4.completed,
            };
            info!(did = %n.did, wwpn = %n.wwpn, "Node mapped");
            self.emit(event);
        }
    }

    pub(crate) fn notify_removed(&mut self, node: NodeHandle) {
        let event = match self.registry.get_mut(node) {
            Ok(n) if n.flags.transport_registered => {
                n.flags.transport_registered = false;
                info!(did = %n.did, wwpn = %n.wwpn, "Node unmapped");
                PortEvent::NodeRemoved {
                    did: n.did,
                    wwpn: n.wwpn,
                }
            }
            _ => return,
        };
        self.emit(event);
        self.release_node(node);
    }

    // === Removal ===

    /// DEVICE_RM: tear a node down and drop it from the index.
    pub(crate) fn remove_node_handle(&mut self, node: NodeHandle, now_ms: u64) {
        self.apply_event(node, NodeEvent::DeviceRm, None, now_ms);
    }

    fn remove_from_index(&mut self, node: NodeHandle) {
        self.drop_delayed_retry(node);
        self.notify_removed(node);
        self.unregister_node_login(node);

        match self.registry.remove(node) {
            Ok(Release::Freed) => trace!(node = %node, "Node freed on removal"),
            Ok(Release::Retained(refs)) => {
                trace!(node = %node, refs, "Node removal deferred to last release")
            }
            Err(e) => warn!(node = %node, error = %e, "Node removal failed"),
        }
    }
}
