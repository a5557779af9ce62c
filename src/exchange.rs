//! In-flight ELS exchanges.
//!
//! An [`Exchange`] is one outstanding command addressed to one node. It holds
//! a strong reference to its node from issue until its single completion.
//! The request kind is a tagged enum and completion handling dispatches on it
//! through one `match` in the port's completion handler.

use std::fmt;

use crate::identity::Did;
use crate::protocol::{ElsCommand, Fc4Type, RequestPayload};
use crate::registry::NodeHandle;

/// Identifier of one exchange, unique per port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// What to do with a node once its LOGO completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogoFollowup {
    /// Leave the node NOT_PRESENT.
    None,
    /// Remove the node from the registry.
    Remove,
    /// Log in again with PLOGI.
    Relogin,
}

/// Kind of ELS request, with the per-kind data its completion needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElsRequest {
    Flogi,
    Fdisc,
    Plogi,
    Prli(Fc4Type),
    Adisc,
    Logo(LogoFollowup),
    /// State change registration.
    Scr,
    /// Any other command, sent outside the login sequence. Without
    /// `expects_response` the driver completes it once it is on the wire.
    Generic {
        command: ElsCommand,
        expects_response: bool,
    },
}

impl ElsRequest {
    /// Wire command code of this request.
    pub fn command(&self) -> ElsCommand {
        match self {
            ElsRequest::Flogi => ElsCommand::Flogi,
            ElsRequest::Fdisc => ElsCommand::Fdisc,
            ElsRequest::Plogi => ElsCommand::Plogi,
            ElsRequest::Prli(_) => ElsCommand::Prli,
            ElsRequest::Adisc => ElsCommand::Adisc,
            ElsRequest::Logo(_) => ElsCommand::Logo,
            ElsRequest::Scr => ElsCommand::Scr,
            ElsRequest::Generic { command, .. } => *command,
        }
    }

    /// Whether the peer answers the request with LS_ACC or LS_RJT.
    pub fn expects_response(&self) -> bool {
        match self {
            ElsRequest::Generic {
                expects_response, ..
            } => *expects_response,
            _ => true,
        }
    }

    /// Fabric login requests go through the fabric gate.
    pub fn is_fabric_login(&self) -> bool {
        !self.is_generic() && self.command().is_fabric_login()
    }

    /// Requests of the per-node login sequence; at most one is outstanding
    /// per node.
    pub fn is_login_sequence(&self) -> bool {
        !self.is_generic() && self.command().is_login_sequence()
    }

    fn is_generic(&self) -> bool {
        matches!(self, ElsRequest::Generic { .. })
    }
}

impl fmt::Display for ElsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElsRequest::Prli(fc4) => write!(f, "PRLI({})", fc4),
            other => write!(f, "{}", other.command()),
        }
    }
}

/// Progress of an exchange through the fabric gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// Waiting in the fabric gate queue.
    Queued,
    /// Handed to the link driver.
    Sent,
}

/// One outstanding ELS command.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub id: ExchangeId,
    pub request: ElsRequest,
    /// Target node; the exchange owns one strong reference to it.
    pub node: NodeHandle,
    pub did: Did,
    pub expects_response: bool,
    /// Zero for the first transmission.
    pub attempt: u32,
    /// Routed through the fabric gate.
    pub fabric: bool,
    /// Occupies a discovery window slot.
    pub discovery: bool,
    pub deadline_ms: u64,
    pub state: ExchangeState,
}

/// What the link driver is asked to transmit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub id: ExchangeId,
    pub did: Did,
    pub command: ElsCommand,
    pub payload: RequestPayload,
    pub expects_response: bool,
    pub timeout_ms: u64,
}
