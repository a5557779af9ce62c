//! ELS Protocol Messages
//!
//! Command codes, completion status taxonomy, login parameters and the
//! RSCN payload format. Payload bodies other than RSCN are carried as
//! structured values: the link driver owns the bit-level encoding of
//! service parameter pages and PRLI service pages.

mod error;
mod frame;
mod params;
mod rscn;
mod status;

use std::fmt;

pub use error::ProtocolError;
pub use frame::{
    Completion, ElsReply, InboundEls, InboundRequest, ReplyKind, RequestPayload, ResponsePayload,
};
pub use params::{AdiscParams, Fc4Type, Fc4Types, PrliParams, ServiceParams};
pub use rscn::{AddressFormat, RscnPage, RscnPayload, RSCN_PAGE_LEN};
pub use status::{
    BusyReason, CompletionStatus, FailureClass, FrameSource, LocalReject, LsRjt, RjtExplanation,
    RjtReason,
};

/// ELS command codes (first byte of the ELS payload).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElsCommand {
    /// Link service reject.
    LsRjt,
    /// Link service accept.
    LsAcc,
    /// N_Port login.
    Plogi,
    /// Fabric login.
    Flogi,
    /// Logout.
    Logo,
    /// Process login.
    Prli,
    /// Discover N_Port service parameters.
    Pdisc,
    /// Fabric discovery (additional virtual N_Port login).
    Fdisc,
    /// Discover address.
    Adisc,
    /// Registered state change notification.
    Rscn,
    /// State change registration.
    Scr,
}

impl ElsCommand {
    /// Wire command code.
    pub fn code(&self) -> u8 {
        match self {
            ElsCommand::LsRjt => 0x01,
            ElsCommand::LsAcc => 0x02,
            ElsCommand::Plogi => 0x03,
            ElsCommand::Flogi => 0x04,
            ElsCommand::Logo => 0x05,
            ElsCommand::Prli => 0x20,
            ElsCommand::Pdisc => 0x50,
            ElsCommand::Fdisc => 0x51,
            ElsCommand::Adisc => 0x52,
            ElsCommand::Rscn => 0x61,
            ElsCommand::Scr => 0x62,
        }
    }

    /// Decode a wire command code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ElsCommand::LsRjt),
            0x02 => Some(ElsCommand::LsAcc),
            0x03 => Some(ElsCommand::Plogi),
            0x04 => Some(ElsCommand::Flogi),
            0x05 => Some(ElsCommand::Logo),
            0x20 => Some(ElsCommand::Prli),
            0x50 => Some(ElsCommand::Pdisc),
            0x51 => Some(ElsCommand::Fdisc),
            0x52 => Some(ElsCommand::Adisc),
            0x61 => Some(ElsCommand::Rscn),
            0x62 => Some(ElsCommand::Scr),
            _ => None,
        }
    }

    /// Whether the command is addressed to the fabric login server and must
    /// pass through the fabric serialization gate.
    pub fn is_fabric_login(&self) -> bool {
        matches!(self, ElsCommand::Flogi | ElsCommand::Fdisc)
    }

    /// Whether the command belongs to a node's login sequence. At most one
    /// such exchange may be outstanding per node.
    pub fn is_login_sequence(&self) -> bool {
        matches!(
            self,
            ElsCommand::Plogi | ElsCommand::Prli | ElsCommand::Adisc | ElsCommand::Logo
        )
    }
}

impl fmt::Display for ElsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElsCommand::LsRjt => "LS_RJT",
            ElsCommand::LsAcc => "LS_ACC",
            ElsCommand::Plogi => "PLOGI",
            ElsCommand::Flogi => "FLOGI",
            ElsCommand::Logo => "LOGO",
            ElsCommand::Prli => "PRLI",
            ElsCommand::Pdisc => "PDISC",
            ElsCommand::Fdisc => "FDISC",
            ElsCommand::Adisc => "ADISC",
            ElsCommand::Rscn => "RSCN",
            ElsCommand::Scr => "SCR",
        };
        write!(f, "{}", s)
    }
}
