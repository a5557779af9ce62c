//! Request, response and unsolicited frame envelopes.

use super::{AdiscParams, CompletionStatus, ElsCommand, LsRjt, PrliParams, RscnPayload, ServiceParams};
use crate::identity::{Did, Wwn};

/// Payload of an outbound ELS request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestPayload {
    /// FLOGI, FDISC, PLOGI, PDISC: our service parameters.
    ServiceParams(ServiceParams),
    /// PRLI: one service parameter page.
    Prli(PrliParams),
    /// ADISC: our identity.
    Adisc(AdiscParams),
    /// LOGO: our port name.
    Logo { wwpn: Wwn },
    /// SCR: full registration.
    Scr,
    /// Command code only.
    None,
}

/// Payload of an accepted response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Accept with no payload of interest.
    None,
    /// FLOGI/FDISC accept: fabric parameters and the address assigned to us.
    Flogi {
        params: ServiceParams,
        assigned_did: Did,
    },
    /// PLOGI/PDISC accept.
    ServiceParams(ServiceParams),
    /// PRLI accept.
    Prli(PrliParams),
    /// ADISC accept.
    Adisc(AdiscParams),
}

/// Completion of one exchange as reported by the link driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub status: CompletionStatus,
    pub response: ResponsePayload,
}

impl Completion {
    /// Accept with a payload.
    pub fn accept(response: ResponsePayload) -> Self {
        Self {
            status: CompletionStatus::Accept,
            response,
        }
    }

    /// Failure with no payload.
    pub fn failed(status: CompletionStatus) -> Self {
        Self {
            status,
            response: ResponsePayload::None,
        }
    }
}

/// An unsolicited ELS request received from a remote port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEls {
    /// Sender's address.
    pub sid: Did,
    /// The destination address in the frame (our address as the sender
    /// sees it).
    pub did: Did,
    pub request: InboundRequest,
}

/// Body of an unsolicited request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundRequest {
    Flogi(ServiceParams),
    Plogi(ServiceParams),
    Prli(PrliParams),
    Adisc(AdiscParams),
    Pdisc(ServiceParams),
    Logo { wwpn: Wwn },
    Rscn(RscnPayload),
    /// A command this engine does not handle.
    Unsupported(u8),
}

impl InboundRequest {
    /// The command code of the request.
    pub fn command_code(&self) -> u8 {
        match self {
            InboundRequest::Flogi(_) => ElsCommand::Flogi.code(),
            InboundRequest::Plogi(_) => ElsCommand::Plogi.code(),
            InboundRequest::Prli(_) => ElsCommand::Prli.code(),
            InboundRequest::Adisc(_) => ElsCommand::Adisc.code(),
            InboundRequest::Pdisc(_) => ElsCommand::Pdisc.code(),
            InboundRequest::Logo { .. } => ElsCommand::Logo.code(),
            InboundRequest::Rscn(_) => ElsCommand::Rscn.code(),
            InboundRequest::Unsupported(code) => *code,
        }
    }
}

/// Kind of reply sent to an unsolicited request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Accept(ResponsePayload),
    Reject(LsRjt),
}

/// Reply to an unsolicited request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElsReply {
    /// Address the reply is sent to.
    pub did: Did,
    /// Command code of the request being answered.
    pub request_code: u8,
    pub kind: ReplyKind,
}

impl ElsReply {
    pub fn accept(did: Did, request_code: u8, payload: ResponsePayload) -> Self {
        Self {
            did,
            request_code,
            kind: ReplyKind::Accept(payload),
        }
    }

    pub fn reject(did: Did, request_code: u8, rjt: LsRjt) -> Self {
        Self {
            did,
            request_code,
            kind: ReplyKind::Reject(rjt),
        }
    }

    /// Whether this reply accepts the request.
    pub fn is_accept(&self) -> bool {
        matches!(self.kind, ReplyKind::Accept(_))
    }
}
