//! Exchange completion status and reject reason codes.

use std::fmt;

/// LS_RJT reason code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RjtReason {
    InvalidCommand,
    LogicalError,
    LogicalBusy,
    ProtocolError,
    UnableToPerform,
    CommandNotSupported,
    CommandAlreadyInProgress,
    VendorUnique,
    Other(u8),
}

impl RjtReason {
    /// Wire code.
    pub fn code(&self) -> u8 {
        match self {
            RjtReason::InvalidCommand => 0x01,
            RjtReason::LogicalError => 0x03,
            RjtReason::LogicalBusy => 0x05,
            RjtReason::ProtocolError => 0x07,
            RjtReason::UnableToPerform => 0x09,
            RjtReason::CommandNotSupported => 0x0b,
            RjtReason::CommandAlreadyInProgress => 0x0e,
            RjtReason::VendorUnique => 0xff,
            RjtReason::Other(code) => *code,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => RjtReason::InvalidCommand,
            0x03 => RjtReason::LogicalError,
            0x05 => RjtReason::LogicalBusy,
            0x07 => RjtReason::ProtocolError,
            0x09 => RjtReason::UnableToPerform,
            0x0b => RjtReason::CommandNotSupported,
            0x0e => RjtReason::CommandAlreadyInProgress,
            0xff => RjtReason::VendorUnique,
            other => RjtReason::Other(other),
        }
    }
}

/// LS_RJT reason explanation code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RjtExplanation {
    NothingMore,
    InvalidPortName,
    InvalidNodeName,
    CommandInProgress,
    PortLoginRequired,
    InvalidNportId,
    OutOfResources,
    CannotSupplyData,
    RequestUnsupported,
    AuthenticationRequired,
    Other(u8),
}

impl RjtExplanation {
    /// Wire code.
    pub fn code(&self) -> u8 {
        match self {
            RjtExplanation::NothingMore => 0x00,
            RjtExplanation::InvalidPortName => 0x0d,
            RjtExplanation::InvalidNodeName => 0x0e,
            RjtExplanation::CommandInProgress => 0x19,
            RjtExplanation::PortLoginRequired => 0x1e,
            RjtExplanation::InvalidNportId => 0x1f,
            RjtExplanation::OutOfResources => 0x29,
            RjtExplanation::CannotSupplyData => 0x2a,
            RjtExplanation::RequestUnsupported => 0x2c,
            RjtExplanation::AuthenticationRequired => 0x48,
            RjtExplanation::Other(code) => *code,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => RjtExplanation::NothingMore,
            0x0d => RjtExplanation::InvalidPortName,
            0x0e => RjtExplanation::InvalidNodeName,
            0x19 => RjtExplanation::CommandInProgress,
            0x1e => RjtExplanation::PortLoginRequired,
            0x1f => RjtExplanation::InvalidNportId,
            0x29 => RjtExplanation::OutOfResources,
            0x2a => RjtExplanation::CannotSupplyData,
            0x2c => RjtExplanation::RequestUnsupported,
            0x48 => RjtExplanation::AuthenticationRequired,
            other => RjtExplanation::Other(other),
        }
    }
}

/// An LS_RJT reason/explanation pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LsRjt {
    pub reason: RjtReason,
    pub explanation: RjtExplanation,
}

impl LsRjt {
    pub fn new(reason: RjtReason, explanation: RjtExplanation) -> Self {
        Self { reason, explanation }
    }

    /// Reject with no further explanation.
    pub fn plain(reason: RjtReason) -> Self {
        Self::new(reason, RjtExplanation::NothingMore)
    }
}

impl fmt::Display for LsRjt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LS_RJT reason 0x{:02x} explanation 0x{:02x}",
            self.reason.code(),
            self.explanation.code()
        )
    }
}

/// Failures detected locally by the adapter or the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocalReject {
    /// No response before the exchange deadline.
    SequenceTimeout,
    /// The login handle the exchange was sent under is not registered.
    InvalidLoginHandle,
    /// Adapter out of exchange resources.
    NoResources,
    /// The adapter refused to transmit the frame.
    IllegalFrame,
    /// The adapter does not support the command.
    IllegalCommand,
    /// Arbitrated loop open failed.
    LoopOpenFailure,
    /// The exchange was aborted while in flight.
    Aborted,
    /// The link went down while the exchange was in flight.
    LinkDown,
    /// Any other adapter status.
    Other(u32),
}

/// Which side reported a busy or frame-level reject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameSource {
    Fabric,
    Nport,
}

/// Busy (F_BSY/P_BSY) reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusyReason {
    /// The port is physically busy.
    PortBusy,
    /// The port is logically busy (resources held by another login).
    LogicalBusy,
}

/// Final status of one exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    /// LS_ACC received.
    Accept,
    /// LS_RJT received.
    LsReject(LsRjt),
    /// Failure detected by the adapter or driver.
    LocalReject(LocalReject),
    /// F_BSY or P_BSY received.
    Busy {
        source: FrameSource,
        reason: BusyReason,
    },
    /// F_RJT or P_RJT received.
    FrameReject {
        source: FrameSource,
        temporarily_unavailable: bool,
    },
}

/// Failure taxonomy used for logging and propagation policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The link is down; the node is marked for later discovery.
    LinkDown,
    /// Driver or adapter detected failure.
    LocalReject,
    /// Peer or fabric rejected the command.
    RemoteReject,
    /// Peer or fabric transiently busy.
    RemoteBusy,
    /// Local and remote views of the login disagree.
    ProtocolInconsistency,
}

impl CompletionStatus {
    /// Whether the exchange was accepted.
    pub fn is_accept(&self) -> bool {
        matches!(self, CompletionStatus::Accept)
    }

    /// Whether the status indicates a transiently busy responder.
    pub fn is_busy(&self) -> bool {
        matches!(self, CompletionStatus::Busy { .. })
    }

    /// Classify a failure. Accepts have no class.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            CompletionStatus::Accept => None,
            CompletionStatus::LocalReject(LocalReject::LinkDown) => Some(FailureClass::LinkDown),
            CompletionStatus::LocalReject(_) => Some(FailureClass::LocalReject),
            CompletionStatus::LsReject(_) | CompletionStatus::FrameReject { .. } => {
                Some(FailureClass::RemoteReject)
            }
            CompletionStatus::Busy { .. } => Some(FailureClass::RemoteBusy),
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Accept => write!(f, "LS_ACC"),
            CompletionStatus::LsReject(rjt) => write!(f, "{}", rjt),
            CompletionStatus::LocalReject(code) => write!(f, "local reject {:?}", code),
            CompletionStatus::Busy { source, reason } => write!(f, "{:?} busy ({:?})", source, reason),
            CompletionStatus::FrameReject {
                source,
                temporarily_unavailable,
            } => write!(
                f,
                "{:?} frame reject (temporarily unavailable: {})",
                source, temporarily_unavailable
            ),
        }
    }
}
