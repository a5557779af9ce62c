//! Exchange issue, delayed retry records and node reference release.

use tracing::{debug, trace, warn};

use super::{Port, PortError};
use crate::exchange::{ElsRequest, Exchange, ExchangeId, ExchangeRequest, ExchangeState};
use crate::gate::Admission;
use crate::identity::Did;
use crate::protocol::{
    AdiscParams, Completion, CompletionStatus, ElsCommand, LocalReject, PrliParams,
    RequestPayload,
};
use crate::registry::{DelayedRetry, NodeHandle, NodeState};
use crate::retry::{self, RetryAction, RetryInput};
use crate::timer::TimerKind;
use crate::transport::{LinkDriver, LinkEvent, TransportError};

impl<D: LinkDriver> Port<D> {
    /// Send one ELS command to a node.
    ///
    /// Takes a node reference for the exchange, moves the node into the
    /// matching *_ISSUED state, arms the exchange deadline and hands the
    /// request to the driver (fabric logins go through the gate). The
    /// outcome arrives later as exactly one completion.
    pub fn issue_els(
        &mut self,
        node: NodeHandle,
        request: ElsRequest,
        attempt: u32,
        discovery: bool,
        now_ms: u64,
    ) -> Result<ExchangeId, PortError> {
        if !self.link_up || !self.driver.link_up() {
            return Err(PortError::LinkDown);
        }
        if self.unloading {
            return Err(PortError::ShuttingDown);
        }

        let (did, in_flight) = {
            let n = self.registry.get(node)?;
            (n.did, n.login_exchange)
        };
        if request.is_login_sequence() && in_flight.is_some() {
            return Err(PortError::LoginInProgress(did));
        }

        let payload = self.request_payload(request);
        self.registry.get_ref(node)?;

        self.next_exchange += 1;
        let id = ExchangeId::new(self.next_exchange);

        self.mark_issued(node, request, id)?;

        let deadline_ms = now_ms + self.els_timeout_ms;
        let fabric = request.is_fabric_login();
        self.exchanges.insert(
            id,
            Exchange {
                id,
                request,
                node,
                did,
                expects_response: request.expects_response(),
                attempt,
                fabric,
                discovery,
                deadline_ms,
                state: ExchangeState::Queued,
            },
        );
        let token = self
            .timers
            .schedule(deadline_ms, TimerKind::ExchangeDeadline { id });
        self.deadline_timers.insert(id, token);

        let wire = ExchangeRequest {
            id,
            did,
            command: request.command(),
            payload,
            expects_response: request.expects_response(),
            timeout_ms: self.els_timeout_ms,
        };

        debug!(
            id = %id,
            did = %did,
            request = %request,
            attempt,
            discovery,
            "Issuing ELS"
        );

        if fabric {
            match self.gate.submit(id, now_ms) {
                Admission::Admitted => self.transmit(wire),
                Admission::Queued => {
                    debug!(id = %id, queued = self.gate.queued(), "Fabric exchange queued");
                    self.queued_sends.insert(id, wire);
                }
            }
        } else {
            self.transmit(wire);
        }

        Ok(id)
    }

    fn request_payload(&self, request: ElsRequest) -> RequestPayload {
        match request {
            ElsRequest::Flogi | ElsRequest::Fdisc | ElsRequest::Plogi => {
                RequestPayload::ServiceParams(self.local_params())
            }
            ElsRequest::Prli(fc4) => RequestPayload::Prli(PrliParams::initiator(fc4)),
            ElsRequest::Adisc => RequestPayload::Adisc(AdiscParams {
                wwpn: self.wwpn,
                wwnn: self.wwnn,
                did: self.my_did,
            }),
            ElsRequest::Logo(_) => RequestPayload::Logo { wwpn: self.wwpn },
            ElsRequest::Scr => RequestPayload::Scr,
            ElsRequest::Generic { command, .. } => match command {
                ElsCommand::Plogi | ElsCommand::Pdisc | ElsCommand::Flogi | ElsCommand::Fdisc => {
                    RequestPayload::ServiceParams(self.local_params())
                }
                ElsCommand::Adisc => RequestPayload::Adisc(AdiscParams {
                    wwpn: self.wwpn,
                    wwnn: self.wwnn,
                    did: self.my_did,
                }),
                ElsCommand::Logo => RequestPayload::Logo { wwpn: self.wwpn },
                _ => RequestPayload::None,
            },
        }
    }

    fn mark_issued(
        &mut self,
        node: NodeHandle,
        request: ElsRequest,
        id: ExchangeId,
    ) -> Result<(), PortError> {
        let n = self.registry.get_mut(node)?;
        match request {
            ElsRequest::Plogi => {
                n.set_state(NodeState::PlogiIssued);
                n.flags.clear_pending();
            }
            ElsRequest::Adisc => {
                if n.state.is_logged_in() {
                    n.adisc_resume = n.state;
                } else if n.state == NodeState::NotPresent && n.prev_state.is_logged_in() {
                    n.adisc_resume = n.prev_state;
                }
                n.set_state(NodeState::AdiscIssued);
                n.flags.adisc_pending = false;
                n.flags.adisc_sent = true;
            }
            ElsRequest::Prli(_) => {
                n.set_state(NodeState::PrliIssued);
                n.flags.prli_sent = true;
            }
            ElsRequest::Logo(_) => {
                n.set_state(NodeState::LogoIssued);
                n.flags.logo_sent = true;
            }
            ElsRequest::Flogi
            | ElsRequest::Fdisc
            | ElsRequest::Scr
            | ElsRequest::Generic { .. } => {}
        }
        if request.is_login_sequence() {
            n.login_exchange = Some(id);
        }
        Ok(())
    }

    /// Hand a request to the driver. A send error becomes a synthetic
    /// local-reject completion processed after the current event.
    pub(crate) fn transmit(&mut self, wire: ExchangeRequest) {
        if let Some(exchange) = self.exchanges.get_mut(&wire.id) {
            exchange.state = ExchangeState::Sent;
        }
        if let Err(e) = self.driver.send_exchange(&wire) {
            warn!(id = %wire.id, did = %wire.did, error = %e, "ELS send failed");
            let code = match e {
                TransportError::LinkDown => LocalReject::LinkDown,
                _ => LocalReject::NoResources,
            };
            self.deferred.push_back(LinkEvent::Completion {
                id: wire.id,
                completion: Completion::failed(CompletionStatus::LocalReject(code)),
            });
        }
    }

    /// Admit queued fabric exchanges while the gate allows.
    pub(crate) fn drain_gate(&mut self, now_ms: u64) {
        while let Some(id) = self.gate.next_ready(now_ms) {
            match self.queued_sends.remove(&id) {
                Some(wire) => {
                    trace!(id = %id, "Fabric exchange admitted from queue");
                    self.transmit(wire);
                    return;
                }
                None => {
                    self.gate.complete(id);
                }
            }
        }
        if let Some(until) = self.gate.blocked_until() {
            if self.gate.queued() > 0 && self.gate_timer.is_none() && now_ms < until {
                self.gate_timer = Some(self.timers.schedule(until, TimerKind::GateUnblock));
            }
        }
    }

    /// Drop one strong reference. Errors are logged; a failed release
    /// means bookkeeping is already inconsistent.
    pub(crate) fn release_node(&mut self, node: NodeHandle) {
        if let Err(e) = self.registry.put_ref(node) {
            warn!(node = %node, error = %e, "Node reference release failed");
        }
    }

    // === Retry ===

    /// Consult the retry engine for a failed exchange and carry out a
    /// resend. Returns the decision; non-retry outcomes are left to the
    /// caller.
    pub(crate) fn retry_or_fail(
        &mut self,
        exchange: &Exchange,
        status: CompletionStatus,
        now_ms: u64,
    ) -> RetryAction {
        if exchange.fabric {
            if let Some(backoff) = retry::fabric_backoff(&self.policy, &status) {
                let until = now_ms + backoff;
                debug!(did = %exchange.did, until, "Fabric busy, blocking gate");
                self.gate.block_until(until);
                if self.gate_timer.is_none() {
                    self.gate_timer = Some(self.timers.schedule(until, TimerKind::GateUnblock));
                }
            }
        }

        let node_state = match self.registry.get(exchange.node) {
            Ok(n) => n.state,
            Err(_) => return RetryAction::GiveUp,
        };
        let input = RetryInput {
            command: exchange.request.command(),
            status,
            attempt: exchange.attempt,
            topology: self.topology(),
            target_is_name_server: exchange.did == Did::NAME_SERVER,
            node_state,
        };
        let action = retry::decide(&self.policy, &input);

        debug!(
            id = %exchange.id,
            did = %exchange.did,
            request = %exchange.request,
            status = %status,
            attempt = exchange.attempt,
            action = %action,
            "ELS failed"
        );

        match action {
            RetryAction::RetryNow => {
                let next = exchange.attempt + 1;
                if let Err(e) = self.issue_els(
                    exchange.node,
                    exchange.request,
                    next,
                    exchange.discovery,
                    now_ms,
                ) {
                    warn!(did = %exchange.did, error = %e, "Immediate retry failed");
                    return RetryAction::GiveUp;
                }
            }
            RetryAction::RetryAfter(delay_ms) => {
                let next = exchange.attempt + 1;
                if let Err(e) = self.arm_delayed_retry(
                    exchange.node,
                    exchange.request,
                    next,
                    exchange.discovery,
                    now_ms + delay_ms,
                ) {
                    warn!(did = %exchange.did, error = %e, "Failed to arm delayed retry");
                    return RetryAction::GiveUp;
                }
            }
            _ => {}
        }
        action
    }

    /// Arm a delayed retry for a node, replacing any armed one. The record
    /// holds its own node reference.
    pub(crate) fn arm_delayed_retry(
        &mut self,
        node: NodeHandle,
        request: ElsRequest,
        attempt: u32,
        discovery: bool,
        deadline_ms: u64,
    ) -> Result<(), PortError> {
        self.cancel_delayed_retry(node);
        self.registry.get_ref(node)?;
        let token = self
            .timers
            .schedule(deadline_ms, TimerKind::DelayedRetry { node });

        let n = self.registry.get_mut(node)?;
        n.delayed_retry = Some(DelayedRetry {
            request,
            attempt,
            discovery,
            deadline_ms,
            token,
        });
        n.flags.delayed_retry_armed = true;
        if request == ElsRequest::Plogi && n.state == NodeState::PlogiIssued {
            n.set_state(NodeState::NotPresent);
        }

        debug!(did = %n.did, request = %request, attempt, deadline_ms, "Delayed retry armed");
        Ok(())
    }

    /// Cancel a node's delayed retry, if armed, and release its reference.
    /// Returns the cancelled record; a discovery record still holds its
    /// window slot and the caller returns it.
    pub(crate) fn cancel_delayed_retry(&mut self, node: NodeHandle) -> Option<DelayedRetry> {
        let record = {
            let n = self.registry.get_mut(node).ok()?;
            n.flags.delayed_retry_armed = false;
            n.delayed_retry.take()?
        };
        self.timers.cancel(record.token);
        self.release_node(node);
        Some(record)
    }

    /// Cancel a node's delayed retry and return a discovery record's
    /// window slot. The discovery scan resumes after the current event.
    pub(crate) fn drop_delayed_retry(&mut self, node: NodeHandle) {
        if let Some(record) = self.cancel_delayed_retry(node) {
            if record.discovery {
                self.window.release();
                self.discovery_kick = true;
            }
        }
    }
}
