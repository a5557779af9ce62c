use super::*;
use crate::exchange::ExchangeId;
use crate::protocol::{
    BusyReason, Completion, CompletionStatus, ElsCommand, ElsReply, Fc4Type, FrameSource,
    PrliParams, ResponsePayload, ServiceParams,
};
use crate::registry::{NodeHandle, NodeState};
use crate::transport::LoginHandle;
use std::collections::VecDeque;

mod login;

pub(super) const T0: u64 = 1_000_000;
pub(super) const LOCAL_DID: Did = Did::from_u24(0x01_01_00);
pub(super) const FABRIC_WWPN: Wwn = Wwn::new(0x2001_000d_ec00_0001);
pub(super) const FABRIC_WWNN: Wwn = Wwn::new(0x2000_000d_ec00_0001);

/// Link driver that records every call and answers nothing on its own,
/// except login registration unless `manual_registration` is set.
#[derive(Debug)]
pub(super) struct RecordingDriver {
    pub(super) link: bool,
    pub(super) sent: Vec<ExchangeRequest>,
    pub(super) replies: Vec<ElsReply>,
    pub(super) registrations: Vec<(NodeHandle, Did)>,
    pub(super) unregistered: Vec<LoginHandle>,
    pub(super) aborted: Vec<ExchangeId>,
    pub(super) ns_queries: usize,
    pub(super) resets: usize,
    pub(super) loop_ports: Vec<Did>,
    pub(super) manual_registration: bool,
    /// Events the driver produced, delivered by [`pump`].
    pub(super) outbox: VecDeque<LinkEvent>,
    next_login: u32,
}

impl RecordingDriver {
    pub(super) fn new() -> Self {
        Self {
            link: true,
            sent: Vec::new(),
            replies: Vec::new(),
            registrations: Vec::new(),
            unregistered: Vec::new(),
            aborted: Vec::new(),
            ns_queries: 0,
            resets: 0,
            loop_ports: Vec::new(),
            manual_registration: false,
            outbox: VecDeque::new(),
            next_login: 0,
        }
    }

    /// Requests of one command sent to one address, in order.
    pub(super) fn sent_to(&self, did: Did, command: ElsCommand) -> Vec<&ExchangeRequest> {
        self.sent
            .iter()
            .filter(|r| r.did == did && r.command == command)
            .collect()
    }

    pub(super) fn count(&self, command: ElsCommand) -> usize {
        self.sent.iter().filter(|r| r.command == command).count()
    }
}

impl LinkDriver for RecordingDriver {
    fn link_up(&self) -> bool {
        self.link
    }

    fn send_exchange(&mut self, request: &ExchangeRequest) -> Result<(), TransportError> {
        if !self.link {
            return Err(TransportError::LinkDown);
        }
        self.sent.push(request.clone());
        Ok(())
    }

    fn send_reply(&mut self, reply: &ElsReply) -> Result<(), TransportError> {
        self.replies.push(reply.clone());
        Ok(())
    }

    fn register_login(
        &mut self,
        node: NodeHandle,
        did: Did,
        _params: &ServiceParams,
    ) -> Result<(), TransportError> {
        self.registrations.push((node, did));
        if !self.manual_registration {
            self.next_login += 1;
            self.outbox.push_back(LinkEvent::LoginRegistered {
                node,
                did,
                result: Ok(LoginHandle::new(self.next_login)),
            });
        }
        Ok(())
    }

    fn unregister_login(&mut self, handle: LoginHandle) -> Result<(), TransportError> {
        self.unregistered.push(handle);
        Ok(())
    }

    fn abort_exchange(&mut self, id: ExchangeId) -> Result<(), TransportError> {
        self.aborted.push(id);
        Ok(())
    }

    fn query_name_server(&mut self) -> Result<(), TransportError> {
        self.ns_queries += 1;
        Ok(())
    }

    fn loop_map(&self) -> Vec<Did> {
        self.loop_ports.clone()
    }

    fn reset_link(&mut self) -> Result<(), TransportError> {
        self.resets += 1;
        Ok(())
    }
}

pub(super) fn make_port() -> Port<RecordingDriver> {
    make_port_with(Config::new())
}

pub(super) fn make_port_with(config: Config) -> Port<RecordingDriver> {
    Port::new(config, RecordingDriver::new()).unwrap()
}

pub(super) fn peer_wwpn(did: Did) -> Wwn {
    Wwn::new(0x5000_0000_0000_0000 | did.as_u32() as u64)
}

pub(super) fn peer_wwnn(did: Did) -> Wwn {
    Wwn::new(0x5100_0000_0000_0000 | did.as_u32() as u64)
}

pub(super) fn peer_params(did: Did) -> ServiceParams {
    ServiceParams::new(peer_wwpn(did), peer_wwnn(did))
}

/// Deliver every event the driver queued until none is left.
pub(super) fn pump(port: &mut Port<RecordingDriver>, now: u64) {
    while let Some(event) = port.driver_mut().outbox.pop_front() {
        port.handle_link_event(event, now);
    }
}

pub(super) fn complete(
    port: &mut Port<RecordingDriver>,
    id: ExchangeId,
    completion: Completion,
    now: u64,
) {
    port.handle_link_event(LinkEvent::Completion { id, completion }, now);
}

/// Id of the last request of `command` sent to `did`.
pub(super) fn last_id(port: &Port<RecordingDriver>, did: Did, command: ElsCommand) -> ExchangeId {
    port.driver()
        .sent_to(did, command)
        .last()
        .map(|r| r.id)
        .unwrap_or_else(|| panic!("no {} sent to {}", command, did))
}

pub(super) fn flogi_accept() -> Completion {
    Completion::accept(ResponsePayload::Flogi {
        params: ServiceParams::new(FABRIC_WWPN, FABRIC_WWNN)
            .fabric()
            .with_clean_address(),
        assigned_did: LOCAL_DID,
    })
}

pub(super) fn busy() -> Completion {
    Completion::failed(CompletionStatus::Busy {
        source: FrameSource::Fabric,
        reason: BusyReason::LogicalBusy,
    })
}

/// Bring the link up and log in to the fabric and name server. Returns
/// with the name-server query outstanding.
pub(super) fn fabric_login(port: &mut Port<RecordingDriver>, now: u64) {
    port.handle_link_event(LinkEvent::LinkUp, now);
    let flogi = last_id(port, Did::FABRIC, ElsCommand::Flogi);
    complete(port, flogi, flogi_accept(), now);

    let ns = last_id(port, Did::NAME_SERVER, ElsCommand::Plogi);
    complete(
        port,
        ns,
        Completion::accept(ResponsePayload::ServiceParams(ServiceParams::new(
            Wwn::new(0x20fc_000d_ec00_0001),
            FABRIC_WWNN,
        ))),
        now,
    );
    pump(port, now);

    let scr = last_id(port, Did::FABRIC_CONTROLLER, ElsCommand::Scr);
    complete(port, scr, Completion::accept(ResponsePayload::None), now);
}

/// Fabric login followed by a name-server answer listing `peers`.
pub(super) fn fabric_with_peers(port: &mut Port<RecordingDriver>, peers: &[Did], now: u64) {
    fabric_login(port, now);
    port.handle_link_event(LinkEvent::NameServerEntries(peers.to_vec()), now);
}

/// Answer the outstanding PLOGI to `did`, register the login and accept
/// the PRLI with a target role.
pub(super) fn login_peer(port: &mut Port<RecordingDriver>, did: Did, now: u64) {
    let plogi = last_id(port, did, ElsCommand::Plogi);
    complete(
        port,
        plogi,
        Completion::accept(ResponsePayload::ServiceParams(peer_params(did))),
        now,
    );
    pump(port, now);
    accept_prli(port, did, now);
}

pub(super) fn accept_prli(port: &mut Port<RecordingDriver>, did: Did, now: u64) {
    let prli = last_id(port, did, ElsCommand::Prli);
    complete(
        port,
        prli,
        Completion::accept(ResponsePayload::Prli(PrliParams::target(Fc4Type::Fcp))),
        now,
    );
}

pub(super) fn node_state(port: &Port<RecordingDriver>, did: Did) -> Option<NodeState> {
    port.node(did).map(|n| n.state())
}
