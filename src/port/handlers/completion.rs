//! Exchange completion: one entry point, one `match` over the request
//! kind, and exactly one node reference released per exchange.

use tracing::{debug, trace, warn};

use crate::exchange::{ElsRequest, Exchange, ExchangeId, LogoFollowup};
use crate::port::Port;
use crate::protocol::{
    Completion, CompletionStatus, Fc4Type, LocalReject, ResponsePayload, ServiceParams,
};
use crate::identity::Did;
use crate::registry::{NodeEvent, NodeState};
use crate::transport::LinkDriver;

impl<D: LinkDriver> Port<D> {
    /// Finish an exchange. Later completions for the same id are ignored.
    pub(crate) fn complete_exchange(&mut self, id: ExchangeId, completion: Completion, now_ms: u64) {
        let Some(exchange) = self.exchanges.remove(&id) else {
            trace!(id = %id, "Completion for unknown exchange ignored");
            return;
        };
        if let Some(token) = self.deadline_timers.remove(&id) {
            self.timers.cancel(token);
        }
        self.queued_sends.remove(&id);
        if exchange.fabric {
            self.gate.complete(id);
        }
        if let Ok(n) = self.registry.get_mut(exchange.node) {
            if n.login_exchange == Some(id) {
                n.login_exchange = None;
            }
        }

        trace!(
            id = %id,
            did = %exchange.did,
            request = %exchange.request,
            status = %completion.status,
            "ELS complete"
        );

        if self.aborted.remove(&id) {
            debug!(id = %id, did = %exchange.did, "Aborted exchange released");
            if exchange.discovery && self.link_up {
                self.discovery_slot_released(exchange.request, now_ms);
            }
        } else if !self.link_up {
            self.abandon_exchange(&exchange);
        } else {
            match exchange.request {
                ElsRequest::Flogi | ElsRequest::Fdisc => {
                    self.fabric_login_complete(&exchange, completion, now_ms)
                }
                ElsRequest::Plogi => self.plogi_complete(&exchange, completion, now_ms),
                ElsRequest::Prli(fc4) => self.prli_complete(&exchange, fc4, completion, now_ms),
                ElsRequest::Adisc => self.adisc_complete(&exchange, completion, now_ms),
                ElsRequest::Logo(followup) => {
                    self.logo_complete(&exchange, followup, completion, now_ms)
                }
                ElsRequest::Scr => self.scr_complete(&exchange, completion, now_ms),
                ElsRequest::Generic { .. } => {
                    self.generic_complete(&exchange, completion, now_ms)
                }
            }
        }

        self.release_node(exchange.node);
        if exchange.fabric && self.link_up {
            self.drain_gate(now_ms);
        }
    }

    /// The link went down under the exchange: leave the node for the next
    /// discovery.
    fn abandon_exchange(&mut self, exchange: &Exchange) {
        if let Ok(n) = self.registry.get_mut(exchange.node) {
            if n.state.is_login_in_progress() {
                n.set_state(NodeState::NotPresent);
            }
            if !n.did.is_well_known() {
                n.flags.discovery_pending = true;
            }
        }
        debug!(id = %exchange.id, did = %exchange.did, "Exchange abandoned, link down");
    }

    /// A discovery exchange (or its retry) finished for good.
    pub(crate) fn discovery_slot_released(&mut self, request: ElsRequest, now_ms: u64) {
        match request {
            ElsRequest::Adisc => self.more_adisc(now_ms),
            _ => self.more_plogi(now_ms),
        }
    }

    fn finish_discovery_exchange(&mut self, exchange: &Exchange, now_ms: u64) {
        if exchange.discovery {
            self.discovery_slot_released(exchange.request, now_ms);
        }
    }

    // === PLOGI ===

    fn plogi_complete(&mut self, exchange: &Exchange, completion: Completion, now_ms: u64) {
        if self.registry.find(exchange.did) != Some(exchange.node) {
            debug!(did = %exchange.did, "PLOGI completion for a node that left its address");
            self.finish_discovery_exchange(exchange, now_ms);
            return;
        }

        match (completion.status, completion.response) {
            (CompletionStatus::Accept, ResponsePayload::ServiceParams(params)) => {
                self.plogi_accepted(exchange, params, now_ms);
            }
            (CompletionStatus::Accept, _) => {
                warn!(did = %exchange.did, "PLOGI accept without service parameters");
                self.plogi_failed(exchange, now_ms);
            }
            (status, _) => {
                if self.retry_or_fail(exchange, status, now_ms).is_retry() {
                    return;
                }
                self.plogi_failed(exchange, now_ms);
            }
        }
    }

    fn plogi_accepted(&mut self, exchange: &Exchange, params: ServiceParams, now_ms: u64) {
        let active = match self.confirm_login(exchange.node, exchange.did, &params) {
            Ok(h) => h,
            Err(e) => {
                warn!(did = %exchange.did, error = %e, "PLOGI confirm failed");
                self.finish_discovery_exchange(exchange, now_ms);
                return;
            }
        };
        debug!(did = %exchange.did, wwpn = %params.wwpn, "PLOGI accepted");

        self.apply_event(active, NodeEvent::CmplPlogi { accepted: true }, None, now_ms);
        self.finish_discovery_exchange(exchange, now_ms);
    }

    fn plogi_failed(&mut self, exchange: &Exchange, now_ms: u64) {
        self.apply_event(
            exchange.node,
            NodeEvent::CmplPlogi { accepted: false },
            None,
            now_ms,
        );

        if exchange.did == Did::NAME_SERVER {
            warn!("Name server login failed, discovering known nodes only");
            self.window.set_ns_query_pending(false);
            self.discovery_start(now_ms);
        }
        self.finish_discovery_exchange(exchange, now_ms);
    }

    // === PRLI ===

    fn prli_complete(
        &mut self,
        exchange: &Exchange,
        fc4: Fc4Type,
        completion: Completion,
        now_ms: u64,
    ) {
        match self.registry.get(exchange.node) {
            Ok(n) if n.state == NodeState::PrliIssued => {}
            _ => {
                debug!(did = %exchange.did, "Stale PRLI completion");
                return;
            }
        }

        match (completion.status, completion.response) {
            (CompletionStatus::Accept, response) => {
                if let Ok(n) = self.registry.get_mut(exchange.node) {
                    n.fc4.in_flight = None;
                    n.fc4.completed.insert(fc4);
                    if let ResponsePayload::Prli(page) = response {
                        n.fc4.target |= page.target;
                        n.fc4.initiator |= page.initiator;
                    }
                    debug!(
                        did = %n.did,
                        fc4 = %fc4,
                        target = n.fc4.target,
                        "PRLI accepted"
                    );
                }
            }
            (status, _) => {
                if self.retry_or_fail(exchange, status, now_ms).is_retry() {
                    return;
                }
                if let Ok(n) = self.registry.get_mut(exchange.node) {
                    n.fc4.in_flight = None;
                }
                debug!(did = %exchange.did, fc4 = %fc4, "PRLI type skipped");
            }
        }

        if !self.issue_next_prli(exchange.node, now_ms) {
            self.prli_finish(exchange.node, now_ms);
        }
    }

    // === ADISC ===

    fn adisc_complete(&mut self, exchange: &Exchange, completion: Completion, now_ms: u64) {
        let (wwpn, wwnn, resume) = match self.registry.get(exchange.node) {
            Ok(n) if n.state == NodeState::AdiscIssued => (n.wwpn, n.wwnn, n.adisc_resume),
            _ => {
                debug!(did = %exchange.did, "Stale ADISC completion");
                self.finish_discovery_exchange(exchange, now_ms);
                return;
            }
        };

        let accepted = match (completion.status, completion.response) {
            (CompletionStatus::Accept, ResponsePayload::Adisc(page)) => {
                let same = page.wwpn == wwpn && page.wwnn == wwnn;
                if !same {
                    debug!(
                        did = %exchange.did,
                        expected = %wwpn,
                        found = %page.wwpn,
                        "ADISC identity mismatch"
                    );
                }
                same
            }
            (CompletionStatus::Accept, _) => false,
            (status, _) => {
                if self.retry_or_fail(exchange, status, now_ms).is_retry() {
                    return;
                }
                false
            }
        };

        self.apply_event(
            exchange.node,
            NodeEvent::CmplAdisc { accepted, resume },
            None,
            now_ms,
        );
        self.finish_discovery_exchange(exchange, now_ms);
    }

    // === LOGO ===

    fn logo_complete(
        &mut self,
        exchange: &Exchange,
        followup: LogoFollowup,
        completion: Completion,
        now_ms: u64,
    ) {
        if !completion.status.is_accept() {
            let action = self.retry_or_fail(exchange, completion.status, now_ms);
            debug!(did = %exchange.did, action = %action, "LOGO failed, logging out locally");
        }

        self.apply_event(exchange.node, NodeEvent::CmplLogo, None, now_ms);

        match followup {
            LogoFollowup::None => {}
            LogoFollowup::Remove => self.remove_node_handle(exchange.node, now_ms),
            LogoFollowup::Relogin => {
                if let Err(e) =
                    self.issue_els(exchange.node, ElsRequest::Plogi, 0, false, now_ms)
                {
                    warn!(did = %exchange.did, error = %e, "Relogin after LOGO failed");
                }
            }
        }
    }

    // === SCR ===

    fn scr_complete(&mut self, exchange: &Exchange, completion: Completion, now_ms: u64) {
        if completion.status.is_accept() {
            debug!("State change registration accepted");
            return;
        }
        let action = self.retry_or_fail(exchange, completion.status, now_ms);
        if !action.is_retry() {
            warn!(status = %completion.status, "State change registration failed");
        }
    }

    // === Other Requests ===

    fn generic_complete(&mut self, exchange: &Exchange, completion: Completion, now_ms: u64) {
        if completion.status.is_accept() {
            debug!(did = %exchange.did, request = %exchange.request, "ELS accepted");
            return;
        }
        let action = self.retry_or_fail(exchange, completion.status, now_ms);
        if !action.is_retry() {
            debug!(
                did = %exchange.did,
                request = %exchange.request,
                status = %completion.status,
                "ELS failed"
            );
        }
    }

    /// Exchange deadline expired without a completion.
    pub(crate) fn exchange_timed_out(&mut self, id: ExchangeId, now_ms: u64) {
        if !self.exchanges.contains_key(&id) {
            return;
        }
        warn!(id = %id, "ELS exchange timed out");
        if let Err(e) = self.driver.abort_exchange(id) {
            debug!(id = %id, error = %e, "Driver abort failed");
        }
        self.complete_exchange(
            id,
            Completion::failed(CompletionStatus::LocalReject(LocalReject::SequenceTimeout)),
            now_ms,
        );
    }
}
