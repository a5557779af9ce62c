//! Unsolicited ELS requests from remote ports.

use tracing::{debug, info, warn};

use crate::exchange::{ElsRequest, LogoFollowup};
use crate::identity::Did;
use crate::port::{Port, PortState};
use crate::protocol::{
    AdiscParams, ElsCommand, ElsReply, InboundEls, InboundRequest, LsRjt, PrliParams,
    ResponsePayload, RjtExplanation, RjtReason, RscnPayload, ServiceParams,
};
use crate::registry::{transition, NodeAction, NodeEvent, NodeHandle, NodeState};
use crate::transport::LinkDriver;

/// Delay before re-logging in to a port that logged us out.
const RELOGIN_AFTER_LOGO_MS: u64 = 1000;

/// Where and how to answer the request being processed. State machine
/// `Accept` actions send `accept`; `Reject` actions carry their own code.
#[derive(Clone, Debug)]
pub(crate) struct ReplyTo {
    pub(crate) did: Did,
    pub(crate) code: u8,
    pub(crate) accept: ResponsePayload,
}

impl ReplyTo {
    fn new(did: Did, command: ElsCommand, accept: ResponsePayload) -> Self {
        Self {
            did,
            code: command.code(),
            accept,
        }
    }
}

impl<D: LinkDriver> Port<D> {
    pub(crate) fn send_reply(&mut self, reply: ElsReply) {
        if let Err(e) = self.driver.send_reply(&reply) {
            warn!(did = %reply.did, code = reply.request_code, error = %e, "ELS reply failed");
        }
    }

    fn reject(&mut self, did: Did, code: u8, reason: RjtReason, explanation: RjtExplanation) {
        debug!(did = %did, code, reason = ?reason, explanation = ?explanation, "Rejecting ELS");
        self.send_reply(ElsReply::reject(did, code, LsRjt::new(reason, explanation)));
    }

    /// Entry point for an unsolicited request.
    pub(crate) fn handle_inbound(&mut self, els: InboundEls, now_ms: u64) {
        let InboundEls { sid, did, request } = els;
        debug!(sid = %sid, did = %did, code = request.command_code(), "Unsolicited ELS");

        match request {
            InboundRequest::Flogi(params) => self.rcv_flogi(sid, params, now_ms),
            InboundRequest::Plogi(params) => self.rcv_plogi(sid, did, params, now_ms),
            InboundRequest::Prli(page) => self.rcv_prli(sid, page, now_ms),
            InboundRequest::Adisc(page) => self.rcv_adisc(sid, page, now_ms),
            InboundRequest::Pdisc(params) => self.rcv_pdisc(sid, params, now_ms),
            InboundRequest::Logo { wwpn } => {
                debug!(sid = %sid, wwpn = %wwpn, "LOGO received");
                self.rcv_logo(sid, now_ms)
            }
            InboundRequest::Rscn(payload) => self.rcv_rscn(sid, payload, now_ms),
            InboundRequest::Unsupported(code) => self.reject(
                sid,
                code,
                RjtReason::CommandNotSupported,
                RjtExplanation::NothingMore,
            ),
        }
    }

    // === FLOGI ===

    /// FLOGI from a point-to-point peer. Resolves the address negotiation
    /// without sending a FLOGI of our own.
    fn rcv_flogi(&mut self, sid: Did, params: ServiceParams, now_ms: u64) {
        let code = ElsCommand::Flogi.code();
        if self.window.is_fabric {
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::NothingMore);
            return;
        }
        if params.wwpn == self.wwpn {
            warn!(wwpn = %params.wwpn, "FLOGI with our own port name, link looped back");
            self.state = PortState::Failed;
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::NothingMore);
            return;
        }

        let local = self.local_params();
        self.send_reply(ElsReply::accept(
            sid,
            code,
            ResponsePayload::ServiceParams(local),
        ));
        self.point_to_point(params.wwpn, now_ms);
    }

    // === PLOGI ===

    fn rcv_plogi(&mut self, sid: Did, did: Did, params: ServiceParams, now_ms: u64) {
        let code = ElsCommand::Plogi.code();
        if self.window.is_point_to_point && self.my_did == Did::UNASSIGNED {
            info!(did = %did, "Address taken from peer PLOGI");
            self.my_did = did;
        }

        let node = match self.registry.find_or_create(sid) {
            Ok(h) => h,
            Err(e) => {
                warn!(sid = %sid, error = %e, "No node for inbound PLOGI");
                self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::OutOfResources);
                return;
            }
        };

        let we_win = self.wwpn > params.wwpn;
        let state = match self.registry.get(node) {
            Ok(n) => n.state,
            Err(_) => return,
        };
        let step = transition(state, NodeEvent::RcvPlogi { we_win });
        if let Some(rjt) = step.actions.iter().find_map(|a| match a {
            NodeAction::Reject(rjt) => Some(*rjt),
            _ => None,
        }) {
            debug!(sid = %sid, "PLOGI collision, our login wins");
            self.send_reply(ElsReply::reject(sid, code, rjt));
            return;
        }

        // The outstanding login goes before the identity moves.
        self.abort_login(node);
        let active = match self.confirm_login(node, sid, &params) {
            Ok(h) => h,
            Err(e) => {
                warn!(sid = %sid, error = %e, "PLOGI confirm failed");
                self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::NothingMore);
                return;
            }
        };
        let from = match self.registry.get(active) {
            Ok(n) => n.state,
            Err(_) => return,
        };
        let reply = ReplyTo::new(
            sid,
            ElsCommand::Plogi,
            ResponsePayload::ServiceParams(self.local_params()),
        );
        let step = transition(from, NodeEvent::RcvPlogi { we_win });
        self.apply_transition(active, from, step, Some(&reply), now_ms);
    }

    // === PRLI ===

    fn rcv_prli(&mut self, sid: Did, page: PrliParams, now_ms: u64) {
        let code = ElsCommand::Prli.code();
        let Some(node) = self.registry.find(sid) else {
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::PortLoginRequired);
            return;
        };
        if !self.fc4_types.contains(page.fc4) {
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::RequestUnsupported);
            return;
        }

        let from = match self.registry.get(node) {
            Ok(n) => n.state,
            Err(_) => return,
        };
        let reply = ReplyTo::new(
            sid,
            ElsCommand::Prli,
            ResponsePayload::Prli(PrliParams::initiator(page.fc4)),
        );
        self.apply_event(node, NodeEvent::RcvPrli, Some(&reply), now_ms);

        let accepted = matches!(
            from,
            NodeState::Unmapped | NodeState::Mapped | NodeState::PrliIssued
        );
        if !accepted {
            return;
        }
        self.record_remote_prli(node, page);
    }

    /// A remote PRLI we accepted tells us the peer's roles.
    fn record_remote_prli(&mut self, node: NodeHandle, page: PrliParams) {
        let promote = match self.registry.get_mut(node) {
            Ok(n) => {
                n.fc4.completed.insert(page.fc4);
                n.fc4.target |= page.target;
                n.fc4.initiator |= page.initiator;
                n.state == NodeState::Unmapped && page.target
            }
            Err(_) => return,
        };
        if promote {
            if let Ok(n) = self.registry.get_mut(node) {
                n.set_state(NodeState::Mapped);
            }
            self.notify_mapped(node);
        }
    }

    // === ADISC / PDISC ===

    fn rcv_adisc(&mut self, sid: Did, page: AdiscParams, now_ms: u64) {
        let code = ElsCommand::Adisc.code();
        let Some(node) = self.registry.find(sid) else {
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::PortLoginRequired);
            return;
        };
        if let Ok(n) = self.registry.get(node) {
            if !n.wwpn.is_zero() && n.wwpn != page.wwpn {
                debug!(sid = %sid, known = %n.wwpn, claimed = %page.wwpn, "ADISC from a different port");
                self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::PortLoginRequired);
                return;
            }
        }
        let reply = ReplyTo::new(
            sid,
            ElsCommand::Adisc,
            ResponsePayload::Adisc(AdiscParams {
                wwpn: self.wwpn,
                wwnn: self.wwnn,
                did: self.my_did,
            }),
        );
        self.apply_event(node, NodeEvent::RcvAdisc, Some(&reply), now_ms);
    }

    fn rcv_pdisc(&mut self, sid: Did, params: ServiceParams, now_ms: u64) {
        let code = ElsCommand::Pdisc.code();
        let Some(node) = self.registry.find(sid) else {
            self.reject(sid, code, RjtReason::UnableToPerform, RjtExplanation::PortLoginRequired);
            return;
        };
        if let Ok(n) = self.registry.get_mut(node) {
            if n.state.is_logged_in() && n.wwpn == params.wwpn {
                n.service_params = Some(params);
            }
        }
        let reply = ReplyTo::new(
            sid,
            ElsCommand::Pdisc,
            ResponsePayload::ServiceParams(self.local_params()),
        );
        self.apply_event(node, NodeEvent::RcvPdisc, Some(&reply), now_ms);
    }

    // === LOGO ===

    fn rcv_logo(&mut self, sid: Did, now_ms: u64) {
        let code = ElsCommand::Logo.code();
        let Some(node) = self.registry.find(sid) else {
            self.send_reply(ElsReply::accept(sid, code, ResponsePayload::None));
            return;
        };

        if sid == Did::FABRIC {
            info!("Fabric logged us out, logging in again");
            self.send_reply(ElsReply::accept(sid, code, ResponsePayload::None));
            self.start_fabric_login(now_ms);
            return;
        }

        // Our own LOGO toward a node being removed is aborted below; the
        // removal it would have finished happens here instead.
        let removing = self.pending_logo_followup(node) == Some(LogoFollowup::Remove);

        self.drop_delayed_retry(node);
        let reply = ReplyTo::new(sid, ElsCommand::Logo, ResponsePayload::None);
        self.apply_event(node, NodeEvent::RcvLogo, Some(&reply), now_ms);

        if removing {
            debug!(did = %sid, "LOGO crossed our own, finishing removal");
            self.remove_node_handle(node, now_ms);
            return;
        }

        if !sid.is_well_known() && self.link_up {
            if let Err(e) = self.arm_delayed_retry(
                node,
                ElsRequest::Plogi,
                0,
                false,
                now_ms + RELOGIN_AFTER_LOGO_MS,
            ) {
                warn!(did = %sid, error = %e, "Failed to schedule relogin after LOGO");
            }
        }
    }

    /// Follow-up of the node's outstanding LOGO, if one is in flight.
    fn pending_logo_followup(&self, node: NodeHandle) -> Option<LogoFollowup> {
        let id = self.registry.get(node).ok()?.login_exchange?;
        match self.exchanges.get(&id)?.request {
            ElsRequest::Logo(followup) => Some(followup),
            _ => None,
        }
    }

    // === RSCN ===

    fn rcv_rscn(&mut self, sid: Did, payload: RscnPayload, now_ms: u64) {
        self.send_reply(ElsReply::accept(
            sid,
            ElsCommand::Rscn.code(),
            ResponsePayload::None,
        ));
        self.rscn_received(payload, now_ms);
    }
}
