//! Remote N_Port node.

use std::fmt;

use crate::exchange::{ElsRequest, ExchangeId};
use crate::identity::{Did, Wwn};
use crate::protocol::{Fc4Type, Fc4Types, ServiceParams};
use crate::timer::TimerToken;
use crate::transport::LoginHandle;

/// Login state of a remote node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Removed from the registry; waiting for the last reference to drop.
    Unused,
    /// Not logged in; eligible for (re)discovery.
    NotPresent,
    PlogiIssued,
    AdiscIssued,
    RegLoginIssued,
    PrliIssued,
    /// Logged in; no FC-4 target session.
    Unmapped,
    /// Logged in with a target FC-4 session.
    Mapped,
    LogoIssued,
}

impl NodeState {
    /// Port login completed and registered.
    pub fn is_logged_in(&self) -> bool {
        matches!(self, NodeState::Unmapped | NodeState::Mapped)
    }

    /// An exchange or registration of the login sequence is outstanding.
    pub fn is_login_in_progress(&self) -> bool {
        matches!(
            self,
            NodeState::PlogiIssued
                | NodeState::AdiscIssued
                | NodeState::RegLoginIssued
                | NodeState::PrliIssued
                | NodeState::LogoIssued
        )
    }

    /// States from which the registry may drop its index reference.
    pub fn is_removable(&self) -> bool {
        matches!(self, NodeState::NotPresent | NodeState::Unused)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Unused => "UNUSED",
            NodeState::NotPresent => "NPR",
            NodeState::PlogiIssued => "PLOGI_ISSUE",
            NodeState::AdiscIssued => "ADISC_ISSUE",
            NodeState::RegLoginIssued => "REG_LOGIN_ISSUE",
            NodeState::PrliIssued => "PRLI_ISSUE",
            NodeState::Unmapped => "UNMAPPED",
            NodeState::Mapped => "MAPPED",
            NodeState::LogoIssued => "LOGO_ISSUE",
        };
        write!(f, "{}", s)
    }
}

/// Orthogonal per-node flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Needs PLOGI in the next discovery pass.
    pub discovery_pending: bool,
    /// Needs ADISC revalidation in the next discovery pass.
    pub adisc_pending: bool,
    /// A delayed retry record is armed.
    pub delayed_retry_armed: bool,
    pub logo_sent: bool,
    pub prli_sent: bool,
    pub adisc_sent: bool,
    /// The adapter holds a login handle for this node.
    pub login_registered: bool,
    /// Login registration was requested and has not completed.
    pub register_in_progress: bool,
    pub unregister_in_progress: bool,
    pub device_loss_in_progress: bool,
    /// The node is reported to the upper layer as mapped.
    pub transport_registered: bool,
}

impl NodeFlags {
    /// Clear the per-exchange "sent" markers.
    pub fn clear_sent(&mut self) {
        self.logo_sent = false;
        self.prli_sent = false;
        self.adisc_sent = false;
    }

    /// Clear the discovery markers.
    pub fn clear_pending(&mut self) {
        self.discovery_pending = false;
        self.adisc_pending = false;
    }
}

/// Progress of process login across FC-4 types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fc4Negotiation {
    /// Types whose PRLI was accepted.
    pub completed: Fc4Types,
    /// Types still waiting to be sent, in send order.
    pub to_send: Fc4Types,
    /// Type whose PRLI is currently outstanding.
    pub in_flight: Option<Fc4Type>,
    /// Remote advertised a target role in some accepted PRLI.
    pub target: bool,
    /// Remote advertised an initiator role in some accepted PRLI.
    pub initiator: bool,
}

impl Fc4Negotiation {
    /// Start a fresh negotiation for the given types.
    pub fn start(types: Fc4Types) -> Self {
        Self {
            to_send: types,
            ..Self::default()
        }
    }

    /// Take the next type to send, marking it in flight.
    pub fn next_to_send(&mut self) -> Option<Fc4Type> {
        let next = self.to_send.iter().next()?;
        self.to_send.remove(next);
        self.in_flight = Some(next);
        Some(next)
    }

    /// Number of PRLI exchanges still to be sent.
    pub fn pending_sends(&self) -> usize {
        self.to_send.iter().count()
    }
}

/// A retry scheduled for later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayedRetry {
    pub request: ElsRequest,
    /// Attempt number the resend will carry.
    pub attempt: u32,
    /// The resend keeps a discovery window slot.
    pub discovery: bool,
    pub deadline_ms: u64,
    pub token: TimerToken,
}

/// A remote N_Port (or well-known fabric service).
#[derive(Clone, Debug)]
pub struct RemoteNode {
    pub(crate) did: Did,
    pub(crate) wwpn: Wwn,
    pub(crate) wwnn: Wwn,
    pub(crate) state: NodeState,
    pub(crate) prev_state: NodeState,
    /// Logged-in state an outstanding ADISC returns the node to.
    pub(crate) adisc_resume: NodeState,
    pub(crate) flags: NodeFlags,
    pub(crate) fc4: Fc4Negotiation,
    pub(crate) login: Option<LoginHandle>,
    pub(crate) service_params: Option<ServiceParams>,
    pub(crate) delayed_retry: Option<DelayedRetry>,
    /// Login-sequence exchange currently outstanding.
    pub(crate) login_exchange: Option<ExchangeId>,
    /// Address the latest pending login registration was requested for.
    pub(crate) register_did: Option<Did>,
}

impl RemoteNode {
    pub(crate) fn new(did: Did) -> Self {
        Self {
            did,
            wwpn: Wwn::ZERO,
            wwnn: Wwn::ZERO,
            state: NodeState::NotPresent,
            prev_state: NodeState::NotPresent,
            adisc_resume: NodeState::Unmapped,
            flags: NodeFlags::default(),
            fc4: Fc4Negotiation::default(),
            login: None,
            service_params: None,
            delayed_retry: None,
            login_exchange: None,
            register_did: None,
        }
    }

    pub fn did(&self) -> Did {
        self.did
    }

    pub fn wwpn(&self) -> Wwn {
        self.wwpn
    }

    pub fn wwnn(&self) -> Wwn {
        self.wwnn
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn prev_state(&self) -> NodeState {
        self.prev_state
    }

    pub fn flags(&self) -> &NodeFlags {
        &self.flags
    }

    pub fn fc4(&self) -> &Fc4Negotiation {
        &self.fc4
    }

    pub fn login(&self) -> Option<LoginHandle> {
        self.login
    }

    pub fn service_params(&self) -> Option<&ServiceParams> {
        self.service_params.as_ref()
    }

    pub fn delayed_retry(&self) -> Option<&DelayedRetry> {
        self.delayed_retry.as_ref()
    }

    pub fn register_did(&self) -> Option<Did> {
        self.register_did
    }

    pub fn login_exchange(&self) -> Option<ExchangeId> {
        self.login_exchange
    }

    /// Move to a new state, remembering the old one.
    pub(crate) fn set_state(&mut self, state: NodeState) {
        if self.state != state {
            self.prev_state = self.state;
            self.state = state;
        }
    }
}
