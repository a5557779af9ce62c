//! Per-node login: identity reconciliation, collisions and unsolicited
//! requests.

use super::*;
use crate::exchange::ElsRequest;
use crate::protocol::{
    AdiscParams, InboundEls, InboundRequest, LsRjt, ReplyKind, RequestPayload, RjtExplanation,
    RjtReason,
};

const PEER: Did = Did::from_u24(0x01_02_01);

fn inbound(sid: Did, request: InboundRequest) -> LinkEvent {
    LinkEvent::Inbound(InboundEls {
        sid,
        did: LOCAL_DID,
        request,
    })
}

fn last_reply(port: &Port<RecordingDriver>) -> ElsReply {
    port.driver().replies.last().cloned().expect("a reply was sent")
}

/// A ready port with `PEER` mapped.
fn port_with_mapped_peer() -> Port<RecordingDriver> {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[PEER], T0);
    login_peer(&mut port, PEER, T0);
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));
    port.take_events();
    port
}

// ============================================================================
// Identity reconciliation
// ============================================================================

#[test]
fn test_plogi_to_known_port_name_swaps_nodes() {
    let known_did = Did::from_u24(0x04_05_06);
    let mut port = make_port();
    fabric_with_peers(&mut port, &[known_did], T0);
    login_peer(&mut port, known_did, T0);
    let known = port.registry().find(known_did).unwrap();
    port.take_events();

    // The same port shows up at a new address.
    let new_did = Did::from_u24(0x01_02_03);
    let issued = port.registry.create(new_did).unwrap();
    let id = port.issue_els(issued, ElsRequest::Plogi, 0, false, T0).unwrap();
    complete(
        &mut port,
        id,
        Completion::accept(ResponsePayload::ServiceParams(peer_params(known_did))),
        T0,
    );

    // The node that carried the port name owns the login at the new address.
    assert_eq!(port.registry().find(new_did), Some(known));
    assert_eq!(node_state(&port, new_did), Some(NodeState::RegLoginIssued));
    assert_eq!(port.node(new_did).unwrap().wwpn(), peer_wwpn(known_did));

    // The created node took the old address and no identity.
    assert_eq!(port.registry().find(known_did), Some(issued));
    let demoted = port.node(known_did).unwrap();
    assert_eq!(demoted.state(), NodeState::NotPresent);
    assert!(demoted.wwpn().is_zero());

    let at_new = port.registry().iter().filter(|(_, n)| n.did() == new_did).count();
    assert_eq!(at_new, 1);

    let events = port.take_events();
    assert_eq!(
        events,
        vec![PortEvent::NodeRemoved {
            did: known_did,
            wwpn: peer_wwpn(known_did),
        }]
    );
    // The login registered under the old address is released.
    assert_eq!(port.driver().unregistered.len(), 1);

    pump(&mut port, T0);
    accept_prli(&mut port, new_did, T0);
    assert_eq!(node_state(&port, new_did), Some(NodeState::Mapped));
    assert!(port.take_events().contains(&PortEvent::NodeMapped {
        did: new_did,
        wwpn: peer_wwpn(known_did),
        fc4: port.node(new_did).unwrap().fc4().completed,
    }));
}

#[test]
fn test_port_name_change_at_address_records_new_name() {
    let mut port = port_with_mapped_peer();
    port.handle_admin(AdminCommand::ForceRelogin(PEER), T0 + 1).unwrap();
    let logo = last_id(&port, PEER, ElsCommand::Logo);
    complete(&mut port, logo, Completion::accept(ResponsePayload::None), T0 + 1);
    port.take_events();

    // A different port answers the relogin.
    let plogi = last_id(&port, PEER, ElsCommand::Plogi);
    let other = Wwn::new(0x5000_0000_0000_beef);
    complete(
        &mut port,
        plogi,
        Completion::accept(ResponsePayload::ServiceParams(ServiceParams::new(
            other,
            Wwn::new(0x5100_0000_0000_beef),
        ))),
        T0 + 1,
    );
    assert_eq!(port.node(PEER).unwrap().wwpn(), other);
    assert_eq!(node_state(&port, PEER), Some(NodeState::RegLoginIssued));
}

#[test]
fn test_swap_with_pending_registration_finishes_login() {
    let old_did = Did::from_u24(0x04_05_06);
    let new_did = Did::from_u24(0x01_02_03);
    let mut port = make_port();
    fabric_with_peers(&mut port, &[old_did], T0);
    port.driver_mut().manual_registration = true;

    // PLOGI accepted at the old address; its registration stays pending.
    let plogi = last_id(&port, old_did, ElsCommand::Plogi);
    complete(
        &mut port,
        plogi,
        Completion::accept(ResponsePayload::ServiceParams(peer_params(old_did))),
        T0,
    );
    let known = port.registry().find(old_did).unwrap();
    assert_eq!(node_state(&port, old_did), Some(NodeState::RegLoginIssued));
    let refs_pending = port.registry().ref_count(known).unwrap();

    // The same port answers at a new address before that registration ends.
    let issued = port.registry.create(new_did).unwrap();
    let id = port.issue_els(issued, ElsRequest::Plogi, 0, false, T0).unwrap();
    complete(
        &mut port,
        id,
        Completion::accept(ResponsePayload::ServiceParams(peer_params(old_did))),
        T0,
    );
    assert_eq!(port.registry().find(new_did), Some(known));
    let registrations = &port.driver().registrations;
    assert_eq!(
        registrations[registrations.len() - 2..],
        [(known, old_did), (known, new_did)]
    );

    // The answer for the address the node left is dropped.
    port.handle_link_event(
        LinkEvent::LoginRegistered {
            node: known,
            did: old_did,
            result: Ok(LoginHandle::new(101)),
        },
        T0,
    );
    assert!(port.driver().unregistered.contains(&LoginHandle::new(101)));
    assert_eq!(node_state(&port, new_did), Some(NodeState::RegLoginIssued));
    assert_eq!(port.node(new_did).unwrap().register_did(), Some(new_did));
    assert_eq!(port.driver().count(ElsCommand::Prli), 0);

    // The answer at the new address carries the login forward.
    port.handle_link_event(
        LinkEvent::LoginRegistered {
            node: known,
            did: new_did,
            result: Ok(LoginHandle::new(102)),
        },
        T0,
    );
    let node = port.node(new_did).unwrap();
    assert_eq!(node.state(), NodeState::PrliIssued);
    assert_eq!(node.login(), Some(LoginHandle::new(102)));
    assert!(!node.flags().register_in_progress);
    assert_eq!(port.driver().sent_to(new_did, ElsCommand::Prli).len(), 1);
    assert_eq!(port.registry().ref_count(known).unwrap(), refs_pending);

    accept_prli(&mut port, new_did, T0);
    assert_eq!(node_state(&port, new_did), Some(NodeState::Mapped));
}

// ============================================================================
// Process login
// ============================================================================

fn prli_types(port: &Port<RecordingDriver>, did: Did) -> Vec<Fc4Type> {
    port.driver()
        .sent_to(did, ElsCommand::Prli)
        .iter()
        .filter_map(|r| match &r.payload {
            RequestPayload::Prli(page) => Some(page.fc4),
            _ => None,
        })
        .collect()
}

#[test]
fn test_prli_sent_per_fc4_type_one_at_a_time() {
    let mut config = Config::new();
    config.port.fc4_types = vec![Fc4Type::Fcp, Fc4Type::Nvme];
    let mut port = make_port_with(config);
    fabric_with_peers(&mut port, &[PEER], T0);

    let plogi = last_id(&port, PEER, ElsCommand::Plogi);
    complete(
        &mut port,
        plogi,
        Completion::accept(ResponsePayload::ServiceParams(peer_params(PEER))),
        T0,
    );
    pump(&mut port, T0);
    assert_eq!(prli_types(&port, PEER), vec![Fc4Type::Fcp]);

    accept_prli(&mut port, PEER, T0);
    assert_eq!(node_state(&port, PEER), Some(NodeState::PrliIssued));
    assert_eq!(prli_types(&port, PEER), vec![Fc4Type::Fcp, Fc4Type::Nvme]);

    // The second type is refused; the login settles on the first.
    let prli = last_id(&port, PEER, ElsCommand::Prli);
    complete(
        &mut port,
        prli,
        Completion::failed(CompletionStatus::LsReject(LsRjt::new(
            RjtReason::UnableToPerform,
            RjtExplanation::RequestUnsupported,
        ))),
        T0,
    );
    let node = port.node(PEER).unwrap();
    assert_eq!(node.state(), NodeState::Mapped);
    assert!(node.fc4().completed.contains(Fc4Type::Fcp));
    assert!(!node.fc4().completed.contains(Fc4Type::Nvme));
    assert_eq!(prli_types(&port, PEER).len(), 2);
}

// ============================================================================
// Other requests
// ============================================================================

#[test]
fn test_generic_request_leaves_login_alone() {
    let mut port = port_with_mapped_peer();
    let node = port.registry().find(PEER).unwrap();
    let refs = port.registry().ref_count(node).unwrap();

    let id = port.send_els(PEER, ElsCommand::Pdisc, false, T0 + 1).unwrap();
    let wire = port.driver().sent.last().unwrap();
    assert_eq!(wire.id, id);
    assert_eq!(wire.command, ElsCommand::Pdisc);
    assert!(!wire.expects_response);
    assert!(matches!(wire.payload, RequestPayload::ServiceParams(_)));
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));
    assert!(port.node(PEER).unwrap().login_exchange().is_none());
    assert_eq!(port.registry().ref_count(node).unwrap(), refs + 1);

    complete(&mut port, id, Completion::accept(ResponsePayload::None), T0 + 1);
    assert_eq!(port.registry().ref_count(node).unwrap(), refs);
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));

    // A reject the retry table does not cover is dropped.
    let id = port.send_els(PEER, ElsCommand::Pdisc, true, T0 + 2).unwrap();
    assert!(port.exchange(id).unwrap().expects_response);
    complete(
        &mut port,
        id,
        Completion::failed(CompletionStatus::LsReject(LsRjt::new(
            RjtReason::UnableToPerform,
            RjtExplanation::NothingMore,
        ))),
        T0 + 2,
    );
    assert_eq!(port.driver().count(ElsCommand::Pdisc), 2);
    assert_eq!(port.registry().ref_count(node).unwrap(), refs);
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));

    assert!(matches!(
        port.send_els(Did::from_u24(0x0a_0b_0c), ElsCommand::Pdisc, true, T0 + 3),
        Err(PortError::NodeNotFound(_))
    ));
}

// ============================================================================
// Collisions
// ============================================================================

#[test]
fn test_plogi_collision_we_win_rejects() {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[PEER], T0);
    assert_eq!(node_state(&port, PEER), Some(NodeState::PlogiIssued));

    let lower = Wwn::new(0x0100_0000_0000_0001);
    assert!(port.wwpn() > lower);
    port.handle_link_event(
        inbound(PEER, InboundRequest::Plogi(ServiceParams::new(lower, lower))),
        T0,
    );

    let reply = last_reply(&port);
    assert_eq!(
        reply.kind,
        ReplyKind::Reject(LsRjt::new(
            RjtReason::UnableToPerform,
            RjtExplanation::CommandInProgress
        ))
    );
    assert_eq!(node_state(&port, PEER), Some(NodeState::PlogiIssued));
    assert!(port.driver().aborted.is_empty());
}

#[test]
fn test_plogi_collision_we_lose_accepts() {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[PEER], T0);
    let ours = last_id(&port, PEER, ElsCommand::Plogi);

    port.handle_link_event(
        inbound(PEER, InboundRequest::Plogi(peer_params(PEER))),
        T0,
    );

    assert!(last_reply(&port).is_accept());
    assert_eq!(port.driver().aborted, vec![ours]);
    assert!(port.exchange(ours).is_none());
    assert_eq!(node_state(&port, PEER), Some(NodeState::RegLoginIssued));

    // The aborted exchange's late completion changes nothing.
    complete(&mut port, ours, flogi_accept(), T0);
    assert_eq!(node_state(&port, PEER), Some(NodeState::RegLoginIssued));

    pump(&mut port, T0);
    accept_prli(&mut port, PEER, T0);
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));
    assert_eq!(port.state(), PortState::Ready);
}

// ============================================================================
// Unsolicited requests
// ============================================================================

#[test]
fn test_inbound_logo_relogins_after_delay() {
    let mut port = port_with_mapped_peer();
    let now = T0 + 50;

    port.handle_link_event(
        inbound(PEER, InboundRequest::Logo { wwpn: peer_wwpn(PEER) }),
        now,
    );

    let reply = last_reply(&port);
    assert_eq!(reply.request_code, ElsCommand::Logo.code());
    assert!(reply.is_accept());
    assert_eq!(node_state(&port, PEER), Some(NodeState::NotPresent));
    assert_eq!(
        port.take_events(),
        vec![PortEvent::NodeRemoved {
            did: PEER,
            wwpn: peer_wwpn(PEER),
        }]
    );
    let retry = port.node(PEER).unwrap().delayed_retry().copied().unwrap();
    assert_eq!(retry.request, ElsRequest::Plogi);
    assert_eq!(retry.deadline_ms, now + 1000);

    port.poll_timers(now + 999);
    assert_eq!(port.driver().sent_to(PEER, ElsCommand::Plogi).len(), 1);

    port.poll_timers(now + 1000);
    assert_eq!(port.driver().sent_to(PEER, ElsCommand::Plogi).len(), 2);
    assert_eq!(node_state(&port, PEER), Some(NodeState::PlogiIssued));
}

#[test]
fn test_inbound_prli_requires_login() {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[], T0);
    let stranger = Did::from_u24(0x01_09_09);

    port.handle_link_event(
        inbound(stranger, InboundRequest::Prli(PrliParams::initiator(Fc4Type::Fcp))),
        T0,
    );

    assert_eq!(
        last_reply(&port).kind,
        ReplyKind::Reject(LsRjt::new(
            RjtReason::UnableToPerform,
            RjtExplanation::PortLoginRequired
        ))
    );
    assert!(port.node(stranger).is_none());
}

#[test]
fn test_inbound_prli_unconfigured_type_rejected() {
    let mut port = port_with_mapped_peer();
    port.handle_link_event(
        inbound(PEER, InboundRequest::Prli(PrliParams::target(Fc4Type::Nvme))),
        T0,
    );
    assert_eq!(
        last_reply(&port).kind,
        ReplyKind::Reject(LsRjt::new(
            RjtReason::UnableToPerform,
            RjtExplanation::RequestUnsupported
        ))
    );
}

#[test]
fn test_inbound_plogi_then_prli_maps_target() {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[], T0);
    let initiator = Did::from_u24(0x01_0a_00);

    port.handle_link_event(inbound(initiator, InboundRequest::Plogi(peer_params(initiator))), T0);
    assert!(last_reply(&port).is_accept());
    pump(&mut port, T0);
    assert_eq!(node_state(&port, initiator), Some(NodeState::PrliIssued));

    // The peer's own PRLI crosses ours.
    port.handle_link_event(
        inbound(initiator, InboundRequest::Prli(PrliParams::target(Fc4Type::Fcp))),
        T0,
    );
    let reply = last_reply(&port);
    assert_eq!(reply.request_code, ElsCommand::Prli.code());
    assert!(reply.is_accept());

    accept_prli(&mut port, initiator, T0);
    assert_eq!(node_state(&port, initiator), Some(NodeState::Mapped));
}

#[test]
fn test_inbound_adisc_answers_with_local_identity() {
    let mut port = port_with_mapped_peer();
    port.handle_link_event(
        inbound(
            PEER,
            InboundRequest::Adisc(AdiscParams {
                wwpn: peer_wwpn(PEER),
                wwnn: peer_wwnn(PEER),
                did: PEER,
            }),
        ),
        T0,
    );

    match last_reply(&port).kind {
        ReplyKind::Accept(ResponsePayload::Adisc(page)) => {
            assert_eq!(page.wwpn, port.wwpn());
            assert_eq!(page.did, LOCAL_DID);
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn test_inbound_adisc_from_other_port_rejected() {
    let mut port = port_with_mapped_peer();
    port.handle_link_event(
        inbound(
            PEER,
            InboundRequest::Adisc(AdiscParams {
                wwpn: Wwn::new(0x5000_0000_0000_dead),
                wwnn: Wwn::new(0x5100_0000_0000_dead),
                did: PEER,
            }),
        ),
        T0,
    );
    assert!(!last_reply(&port).is_accept());
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));
}

#[test]
fn test_unsupported_command_rejected() {
    let mut port = port_with_mapped_peer();
    port.handle_link_event(inbound(PEER, InboundRequest::Unsupported(0x7f)), T0);
    let reply = last_reply(&port);
    assert_eq!(reply.request_code, 0x7f);
    assert_eq!(
        reply.kind,
        ReplyKind::Reject(LsRjt::new(
            RjtReason::CommandNotSupported,
            RjtExplanation::NothingMore
        ))
    );
}

// ============================================================================
// Administrative relogin
// ============================================================================

#[test]
fn test_force_relogin_logs_out_then_in() {
    let mut port = port_with_mapped_peer();
    port.handle_admin(AdminCommand::ForceRelogin(PEER), T0 + 1).unwrap();
    assert_eq!(node_state(&port, PEER), Some(NodeState::LogoIssued));

    let logo = last_id(&port, PEER, ElsCommand::Logo);
    complete(&mut port, logo, Completion::accept(ResponsePayload::None), T0 + 1);

    assert_eq!(node_state(&port, PEER), Some(NodeState::PlogiIssued));
    assert_eq!(port.driver().sent_to(PEER, ElsCommand::Plogi).len(), 2);

    login_peer(&mut port, PEER, T0 + 1);
    assert_eq!(node_state(&port, PEER), Some(NodeState::Mapped));
}

#[test]
fn test_force_relogin_mid_login_refused() {
    let mut port = make_port();
    fabric_with_peers(&mut port, &[PEER], T0);
    assert!(matches!(
        port.handle_admin(AdminCommand::ForceRelogin(PEER), T0),
        Err(PortError::LoginInProgress(did)) if did == PEER
    ));
    assert!(matches!(
        port.handle_admin(AdminCommand::ForceRelogin(Did::from_u24(0x0f_0f_0f)), T0),
        Err(PortError::NodeNotFound(_))
    ));
}
