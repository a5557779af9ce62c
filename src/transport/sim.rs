//! In-process simulated fabric.
//!
//! [`SimFabric`] answers every request synchronously by queueing the
//! matching [`LinkEvent`] on the port's event channel, the same way an
//! adapter completes exchanges from its interrupt path. It models a switched
//! fabric with a name server, a point-to-point peer, or a bare loop,
//! according to [`SimConfig`].

use std::collections::HashMap;

use tracing::{debug, trace};

use super::{LinkDriver, LinkEvent, LinkEventTx, LoginHandle, TransportError};
use crate::config::{SimConfig, SimPeer, SimTopology};
use crate::exchange::{ExchangeId, ExchangeRequest};
use crate::identity::{Did, Wwn};
use crate::protocol::{
    AdiscParams, BusyReason, Completion, CompletionStatus, ElsCommand, ElsReply, FrameSource,
    InboundEls, InboundRequest, LocalReject, LsRjt, PrliParams, RequestPayload, ResponsePayload,
    RjtExplanation, RjtReason, RscnPayload, ServiceParams,
};
use crate::registry::NodeHandle;

/// Simulated link driver.
pub struct SimFabric {
    config: SimConfig,
    local_wwpn: Wwn,
    local_wwnn: Wwn,
    events: LinkEventTx,
    link_up: bool,
    flogi_busy_remaining: u32,
    next_login: u32,
    logins: HashMap<LoginHandle, Did>,
    sent: Vec<ElsCommand>,
    replies: Vec<ElsReply>,
    /// Events that follow the completion being produced.
    followups: Vec<LinkEvent>,
}

impl SimFabric {
    /// Create a simulator for a local port with the given names.
    pub fn new(config: SimConfig, local_wwpn: Wwn, local_wwnn: Wwn, events: LinkEventTx) -> Self {
        let flogi_busy_remaining = config.flogi_busy;
        Self {
            config,
            local_wwpn,
            local_wwnn,
            events,
            link_up: false,
            flogi_busy_remaining,
            next_login: 0,
            logins: HashMap::new(),
            sent: Vec::new(),
            replies: Vec::new(),
            followups: Vec::new(),
        }
    }

    /// Bring the link up.
    pub fn start(&mut self) -> Result<(), TransportError> {
        self.link_up = true;
        self.push(LinkEvent::LinkUp)
    }

    /// Take the link down.
    pub fn stop(&mut self) -> Result<(), TransportError> {
        self.link_up = false;
        self.push(LinkEvent::LinkDown)
    }

    /// Deliver an RSCN from the fabric controller.
    pub fn inject_rscn(&mut self, payload: RscnPayload) -> Result<(), TransportError> {
        self.push(LinkEvent::Inbound(InboundEls {
            sid: Did::FABRIC_CONTROLLER,
            did: self.config.assigned_did,
            request: InboundRequest::Rscn(payload),
        }))
    }

    /// Add a peer to the fabric, as if it had just logged in.
    pub fn add_peer(&mut self, peer: SimPeer) {
        self.config.peers.retain(|p| p.did != peer.did);
        self.config.peers.push(peer);
    }

    /// Remove a peer from the fabric.
    pub fn remove_peer(&mut self, did: Did) {
        self.config.peers.retain(|p| p.did != did);
    }

    /// Commands sent so far, in order.
    pub fn sent(&self) -> &[ElsCommand] {
        &self.sent
    }

    /// Replies sent so far, in order.
    pub fn replies(&self) -> &[ElsReply] {
        &self.replies
    }

    /// Logins currently registered.
    pub fn registered_logins(&self) -> usize {
        self.logins.len()
    }

    fn push(&self, event: LinkEvent) -> Result<(), TransportError> {
        self.events
            .try_send(event)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn complete(&self, id: ExchangeId, completion: Completion) -> Result<(), TransportError> {
        self.push(LinkEvent::Completion { id, completion })
    }

    fn peer_params(peer: &SimPeer) -> ServiceParams {
        ServiceParams::new(peer.wwpn, peer.wwnn)
    }

    fn reject(reason: RjtReason, explanation: RjtExplanation) -> Completion {
        Completion::failed(CompletionStatus::LsReject(LsRjt::new(reason, explanation)))
    }

    fn answer(&mut self, request: &ExchangeRequest) -> Completion {
        let no_such_port = Completion::failed(CompletionStatus::FrameReject {
            source: FrameSource::Fabric,
            temporarily_unavailable: false,
        });

        match request.command {
            ElsCommand::Flogi | ElsCommand::Fdisc => self.answer_fabric_login(request),
            ElsCommand::Plogi if request.did.is_fabric_service() => {
                if self.config.topology == SimTopology::Fabric {
                    Completion::accept(ResponsePayload::ServiceParams(
                        ServiceParams::new(self.config.fabric_wwpn, self.config.fabric_wwnn),
                    ))
                } else {
                    no_such_port
                }
            }
            ElsCommand::Scr => {
                if self.config.topology == SimTopology::Fabric {
                    Completion::accept(ResponsePayload::None)
                } else {
                    Self::reject(RjtReason::CommandNotSupported, RjtExplanation::NothingMore)
                }
            }
            command => {
                let peer = match self.config.topology {
                    SimTopology::PointToPoint => self.config.peers.first(),
                    _ => self.config.peer(request.did),
                };
                let Some(peer) = peer else {
                    return no_such_port;
                };
                match (command, &request.payload) {
                    (ElsCommand::Plogi, _) | (ElsCommand::Pdisc, _) => {
                        Completion::accept(ResponsePayload::ServiceParams(Self::peer_params(peer)))
                    }
                    (ElsCommand::Prli, RequestPayload::Prli(page)) => {
                        if peer.fc4_types.contains(&page.fc4) {
                            Completion::accept(ResponsePayload::Prli(PrliParams {
                                fc4: page.fc4,
                                initiator: !peer.target,
                                target: peer.target,
                            }))
                        } else {
                            Self::reject(
                                RjtReason::UnableToPerform,
                                RjtExplanation::RequestUnsupported,
                            )
                        }
                    }
                    (ElsCommand::Adisc, _) => Completion::accept(ResponsePayload::Adisc(
                        AdiscParams {
                            wwpn: peer.wwpn,
                            wwnn: peer.wwnn,
                            did: peer.did,
                        },
                    )),
                    (ElsCommand::Logo, _) => Completion::accept(ResponsePayload::None),
                    _ => Self::reject(RjtReason::CommandNotSupported, RjtExplanation::NothingMore),
                }
            }
        }
    }

    fn answer_fabric_login(&mut self, request: &ExchangeRequest) -> Completion {
        match self.config.topology {
            SimTopology::Fabric => {
                if self.flogi_busy_remaining > 0 {
                    self.flogi_busy_remaining -= 1;
                    return Completion::failed(CompletionStatus::Busy {
                        source: FrameSource::Fabric,
                        reason: BusyReason::LogicalBusy,
                    });
                }
                let mut assigned = self.config.assigned_did;
                if request.command == ElsCommand::Fdisc {
                    assigned = Did::from_u24(assigned.as_u32() + 1);
                }
                Completion::accept(ResponsePayload::Flogi {
                    params: ServiceParams::new(self.config.fabric_wwpn, self.config.fabric_wwnn)
                        .fabric(),
                    assigned_did: assigned,
                })
            }
            SimTopology::PointToPoint => match self.config.peers.first() {
                Some(peer) => {
                    let params = Self::peer_params(peer);
                    if peer.wwpn > self.local_wwpn {
                        // The other side wins and logs in to us.
                        self.followups.push(LinkEvent::Inbound(InboundEls {
                            sid: Did::PT2PT_LOCAL,
                            did: Did::PT2PT_REMOTE,
                            request: InboundRequest::Plogi(params),
                        }));
                    }
                    Completion::accept(ResponsePayload::Flogi {
                        params,
                        assigned_did: Did::UNASSIGNED,
                    })
                }
                None => Completion::failed(CompletionStatus::LocalReject(
                    LocalReject::SequenceTimeout,
                )),
            },
            SimTopology::Loop => {
                Completion::failed(CompletionStatus::LocalReject(LocalReject::SequenceTimeout))
            }
        }
    }
}

impl LinkDriver for SimFabric {
    fn link_up(&self) -> bool {
        self.link_up
    }

    fn send_exchange(&mut self, request: &ExchangeRequest) -> Result<(), TransportError> {
        if !self.link_up {
            return Err(TransportError::LinkDown);
        }
        trace!(id = %request.id, did = %request.did, command = %request.command, "Sim send");
        self.sent.push(request.command);
        let completion = if request.expects_response {
            self.answer(request)
        } else {
            Completion::accept(ResponsePayload::None)
        };
        self.complete(request.id, completion)?;
        for event in std::mem::take(&mut self.followups) {
            if let Err(e) = self.push(event) {
                debug!(error = %e, "Dropped simulated follow-up event");
            }
        }
        Ok(())
    }

    fn send_reply(&mut self, reply: &ElsReply) -> Result<(), TransportError> {
        if !self.link_up {
            return Err(TransportError::LinkDown);
        }
        self.replies.push(reply.clone());
        Ok(())
    }

    fn register_login(
        &mut self,
        node: NodeHandle,
        did: Did,
        _params: &ServiceParams,
    ) -> Result<(), TransportError> {
        if !self.link_up {
            return Err(TransportError::LinkDown);
        }
        self.next_login += 1;
        let handle = LoginHandle::new(self.next_login);
        self.logins.insert(handle, did);
        self.push(LinkEvent::LoginRegistered {
            node,
            did,
            result: Ok(handle),
        })
    }

    fn unregister_login(&mut self, handle: LoginHandle) -> Result<(), TransportError> {
        self.logins
            .remove(&handle)
            .map(|_| ())
            .ok_or(TransportError::UnknownLogin(handle))
    }

    fn abort_exchange(&mut self, _id: ExchangeId) -> Result<(), TransportError> {
        Ok(())
    }

    fn query_name_server(&mut self) -> Result<(), TransportError> {
        if !self.link_up {
            return Err(TransportError::LinkDown);
        }
        let entries = self
            .config
            .peers
            .iter()
            .map(|p| p.did)
            .filter(|did| *did != self.config.assigned_did)
            .collect();
        self.push(LinkEvent::NameServerEntries(entries))
    }

    fn loop_map(&self) -> Vec<Did> {
        match self.config.topology {
            SimTopology::Loop => self.config.peers.iter().map(|p| p.did).collect(),
            _ => Vec::new(),
        }
    }

    fn reset_link(&mut self) -> Result<(), TransportError> {
        self.logins.clear();
        self.push(LinkEvent::LinkDown)?;
        self.push(LinkEvent::LinkUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::link_event_channel;

    fn request(id: u64, did: Did, command: ElsCommand, payload: RequestPayload) -> ExchangeRequest {
        ExchangeRequest {
            id: ExchangeId::new(id),
            did,
            command,
            payload,
            expects_response: true,
            timeout_ms: 20_000,
        }
    }

    fn local_params() -> RequestPayload {
        RequestPayload::ServiceParams(ServiceParams::new(Wwn::new(1), Wwn::new(2)))
    }

    #[tokio::test]
    async fn test_fabric_flogi_busy_then_accept() {
        let (tx, mut rx) = link_event_channel(16);
        let config = SimConfig {
            flogi_busy: 1,
            ..SimConfig::default()
        };
        let mut sim = SimFabric::new(config, Wwn::new(1), Wwn::new(2), tx);
        sim.start().unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::LinkUp));

        sim.send_exchange(&request(1, Did::FABRIC, ElsCommand::Flogi, local_params()))
            .unwrap();
        match rx.recv().await {
            Some(LinkEvent::Completion { completion, .. }) => assert!(completion.status.is_busy()),
            other => panic!("unexpected {:?}", other),
        }

        sim.send_exchange(&request(2, Did::FABRIC, ElsCommand::Flogi, local_params()))
            .unwrap();
        match rx.recv().await {
            Some(LinkEvent::Completion {
                completion:
                    Completion {
                        response: ResponsePayload::Flogi { params, assigned_did },
                        ..
                    },
                ..
            }) => {
                assert!(params.fabric_port);
                assert_eq!(assigned_did, Did::from_u24(0x010100));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_name_server_query_lists_peers() {
        let (tx, mut rx) = link_event_channel(16);
        let mut sim = SimFabric::new(SimConfig::default(), Wwn::new(1), Wwn::new(2), tx);
        sim.start().unwrap();
        rx.recv().await;
        sim.query_name_server().unwrap();
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::NameServerEntries(vec![
                Did::from_u24(0x010200),
                Did::from_u24(0x010300)
            ]))
        );
    }

    #[test]
    fn test_send_while_down_fails() {
        let (tx, _rx) = link_event_channel(16);
        let mut sim = SimFabric::new(SimConfig::default(), Wwn::new(1), Wwn::new(2), tx);
        assert!(matches!(
            sim.send_exchange(&request(1, Did::FABRIC, ElsCommand::Flogi, local_params())),
            Err(TransportError::LinkDown)
        ));
    }

    #[tokio::test]
    async fn test_login_registration_roundtrip() {
        let (tx, mut rx) = link_event_channel(16);
        let mut sim = SimFabric::new(SimConfig::default(), Wwn::new(1), Wwn::new(2), tx);
        sim.start().unwrap();
        rx.recv().await;

        let mut registry = crate::registry::NodeRegistry::new(4);
        let node = registry.create(Did::from_u24(0x010200)).unwrap();
        sim.register_login(node, Did::from_u24(0x010200), &ServiceParams::new(Wwn::new(3), Wwn::new(4)))
            .unwrap();
        let handle = match rx.recv().await {
            Some(LinkEvent::LoginRegistered { result: Ok(h), .. }) => h,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(sim.registered_logins(), 1);
        sim.unregister_login(handle).unwrap();
        assert!(sim.unregister_login(handle).is_err());
    }
}
