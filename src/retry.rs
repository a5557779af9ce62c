//! Retry and backoff decisions for failed ELS exchanges.
//!
//! [`decide`] is a pure function of the failed exchange: its command, the
//! completion status with reject reason and explanation, how many times it
//! was already sent, and the current topology. The table mirrors how HBA
//! drivers treat each wire-level reason: most failures get a small bounded
//! retry count, specific busy and resource codes get wider bounds with a
//! fixed delay, FLOGI retries forever with an escalating delay, and LOGO
//! is never retried.

use std::fmt;

use crate::protocol::{
    BusyReason, CompletionStatus, ElsCommand, LocalReject, RjtExplanation, RjtReason,
};
use crate::registry::NodeState;

/// Delay used by most "try again later" reasons.
const SLOW_RETRY_MS: u64 = 1000;
/// Delay used for adapter-side transient failures.
const FAST_RETRY_MS: u64 = 100;
/// FLOGI delay once the attempt count passes [`FLOGI_SLOW_AFTER`].
const FLOGI_SLOWEST_MS: u64 = 5000;
const FLOGI_SLOW_AFTER: u32 = 32;
const FLOGI_SLOWEST_AFTER: u32 = 100;
/// Attempt bound for busy and in-progress rejects.
const BUSY_MAX_TRIES: u32 = 48;
/// Attempt bound when the remote port requires authentication.
const AUTH_MAX_TRIES: u32 = 8;
/// Attempt bound for adapter resource exhaustion.
const NO_RESOURCES_MAX_TRIES: u32 = 250;
const NO_RESOURCES_SLOW_AFTER: u32 = 100;
/// FLOGI bound in loopback mode.
const LOOPBACK_FLOGI_MAX_TRIES: u32 = 2;

/// Configured bounds used by [`decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Default attempt bound for PLOGI/PRLI/ADISC/SCR.
    pub max_els_tries: u32,
    /// Gate backoff armed by busy responses.
    pub fabric_busy_backoff_ms: u64,
    /// Device-loss timeout; bounds FDISC at one retry per second.
    pub devloss_tmo_secs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_els_tries: 3,
            fabric_busy_backoff_ms: 100,
            devloss_tmo_secs: 30,
        }
    }
}

/// Link facts the decision depends on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    pub link_up: bool,
    /// The port is being unloaded or administratively disabled.
    pub port_disabled: bool,
    pub is_fabric: bool,
    pub is_point_to_point: bool,
    pub is_loop: bool,
    pub loopback: bool,
}

/// Everything [`decide`] looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryInput {
    pub command: ElsCommand,
    pub status: CompletionStatus,
    /// Zero-based attempt number of the exchange that failed.
    pub attempt: u32,
    pub topology: Topology,
    /// The exchange targeted the name server.
    pub target_is_name_server: bool,
    /// State of the target node when the failure was processed.
    pub node_state: NodeState,
}

/// What to do about a failed exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryAction {
    /// Finalize the failure.
    GiveUp,
    /// Resend at once with the next attempt number.
    RetryNow,
    /// Resend after the given delay in milliseconds.
    RetryAfter(u64),
    /// Bounce the link.
    ResetLink,
    /// Restart the fabric login sequence from FLOGI.
    RestartLogin,
}

impl RetryAction {
    /// Whether the command will be sent again.
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryAction::RetryNow | RetryAction::RetryAfter(_))
    }

    /// Delay before the resend, zero for an immediate one.
    pub fn delay_ms(&self) -> Option<u64> {
        match self {
            RetryAction::RetryNow => Some(0),
            RetryAction::RetryAfter(ms) => Some(*ms),
            _ => None,
        }
    }
}

impl fmt::Display for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryAction::GiveUp => write!(f, "give_up"),
            RetryAction::RetryNow => write!(f, "retry_now"),
            RetryAction::RetryAfter(ms) => write!(f, "retry_after({}ms)", ms),
            RetryAction::ResetLink => write!(f, "reset_link"),
            RetryAction::RestartLogin => write!(f, "restart_login"),
        }
    }
}

/// Working values while walking the table.
struct Plan {
    retry: bool,
    /// Attempt bound; zero means unbounded.
    max_tries: u32,
    delay_ms: u64,
}

/// Decide how to handle a failed exchange.
pub fn decide(policy: &RetryPolicy, input: &RetryInput) -> RetryAction {
    let topo = &input.topology;
    if !topo.link_up || topo.port_disabled {
        return RetryAction::GiveUp;
    }
    if input.command == ElsCommand::Logo {
        return RetryAction::GiveUp;
    }

    let cmd = input.command;
    let attempt = input.attempt;
    let mut plan = Plan {
        retry: false,
        max_tries: policy.max_els_tries,
        delay_ms: 0,
    };

    match input.status {
        CompletionStatus::Accept => return RetryAction::GiveUp,

        CompletionStatus::LocalReject(code) => match code {
            LocalReject::LinkDown | LocalReject::IllegalCommand | LocalReject::Other(_) => {
                return RetryAction::GiveUp;
            }
            LocalReject::LoopOpenFailure => {
                if cmd == ElsCommand::Flogi {
                    plan.delay_ms = SLOW_RETRY_MS;
                    plan.max_tries = BUSY_MAX_TRIES;
                }
                plan.retry = true;
            }
            LocalReject::NoResources => {
                plan.retry = true;
                if attempt >= NO_RESOURCES_SLOW_AFTER {
                    plan.delay_ms = FAST_RETRY_MS;
                }
                plan.max_tries = NO_RESOURCES_MAX_TRIES;
            }
            LocalReject::IllegalFrame => {
                plan.delay_ms = FAST_RETRY_MS;
                plan.retry = true;
            }
            LocalReject::InvalidLoginHandle => {
                if cmd == ElsCommand::Plogi && input.target_is_name_server {
                    plan.max_tries = 0;
                    plan.delay_ms = FAST_RETRY_MS;
                } else if cmd == ElsCommand::Prli && input.node_state != NodeState::PrliIssued {
                    // Local and remote views of the login disagree.
                    return RetryAction::GiveUp;
                }
                plan.retry = true;
            }
            LocalReject::SequenceTimeout => {
                if cmd == ElsCommand::Plogi && input.target_is_name_server {
                    plan.delay_ms = FAST_RETRY_MS;
                }
                plan.retry = true;
            }
            LocalReject::Aborted => {
                if cmd == ElsCommand::Plogi {
                    plan.delay_ms = SLOW_RETRY_MS;
                    plan.max_tries = policy.max_els_tries + 1;
                }
                plan.retry = true;
            }
        },

        CompletionStatus::FrameReject {
            temporarily_unavailable,
            ..
        } => {
            plan.retry = temporarily_unavailable;
        }

        CompletionStatus::Busy { reason, .. } => {
            plan.retry = true;
            if reason == BusyReason::LogicalBusy {
                logical_busy(cmd, attempt, &mut plan);
            }
        }

        CompletionStatus::LsReject(rjt) => match rjt.reason {
            RjtReason::UnableToPerform => match rjt.explanation {
                RjtExplanation::RequestUnsupported if cmd == ElsCommand::Prli => {
                    return RetryAction::GiveUp;
                }
                RjtExplanation::CommandInProgress | RjtExplanation::CannotSupplyData => {
                    if cmd == ElsCommand::Plogi {
                        plan.delay_ms = SLOW_RETRY_MS;
                        plan.max_tries = BUSY_MAX_TRIES;
                    }
                    plan.retry = true;
                }
                RjtExplanation::AuthenticationRequired => {
                    plan.delay_ms = SLOW_RETRY_MS;
                    plan.max_tries = AUTH_MAX_TRIES;
                    plan.retry = true;
                }
                RjtExplanation::OutOfResources if cmd == ElsCommand::Fdisc => {
                    return RetryAction::GiveUp;
                }
                _ if cmd == ElsCommand::Plogi || cmd == ElsCommand::Prli => {
                    plan.delay_ms = SLOW_RETRY_MS;
                    plan.max_tries = policy.max_els_tries + 1;
                    plan.retry = true;
                }
                _ => {}
            },
            RjtReason::LogicalBusy => {
                plan.retry = true;
                logical_busy(cmd, attempt, &mut plan);
            }
            RjtReason::LogicalError => {
                if cmd == ElsCommand::Fdisc && rjt.explanation == RjtExplanation::PortLoginRequired
                {
                    return RetryAction::RestartLogin;
                }
                if cmd == ElsCommand::Flogi && rjt.explanation == RjtExplanation::NothingMore {
                    plan.delay_ms = SLOW_RETRY_MS;
                    plan.retry = true;
                }
            }
            RjtReason::ProtocolError => {
                if cmd == ElsCommand::Fdisc
                    && matches!(
                        rjt.explanation,
                        RjtExplanation::InvalidPortName | RjtExplanation::InvalidNportId
                    )
                {
                    return RetryAction::GiveUp;
                }
            }
            RjtReason::CommandNotSupported if cmd == ElsCommand::Prli => {
                return RetryAction::GiveUp;
            }
            _ => {}
        },
    }

    match cmd {
        ElsCommand::Flogi if !topo.is_loop => {
            plan.retry = true;
            plan.max_tries = if topo.loopback {
                LOOPBACK_FLOGI_MAX_TRIES
            } else {
                0
            };
            if attempt >= FLOGI_SLOWEST_AFTER {
                plan.delay_ms = plan.delay_ms.max(FLOGI_SLOWEST_MS);
            } else if attempt >= FLOGI_SLOW_AFTER {
                plan.delay_ms = plan.delay_ms.max(SLOW_RETRY_MS);
            }
        }
        ElsCommand::Fdisc => {
            plan.retry = true;
            plan.max_tries = policy.devloss_tmo_secs;
            plan.delay_ms = SLOW_RETRY_MS;
        }
        _ => {}
    }

    if cmd == ElsCommand::Flogi && is_busy_class(&input.status) {
        plan.delay_ms = plan.delay_ms.max(SLOW_RETRY_MS);
    }

    let next = attempt.saturating_add(1);
    if plan.max_tries != 0 && next >= plan.max_tries {
        plan.retry = false;
    }

    if !plan.retry {
        if cmd == ElsCommand::Flogi
            && input.status == CompletionStatus::LocalReject(LocalReject::LoopOpenFailure)
        {
            return RetryAction::ResetLink;
        }
        return RetryAction::GiveUp;
    }

    match plan.delay_ms {
        0 => RetryAction::RetryNow,
        ms => RetryAction::RetryAfter(ms),
    }
}

fn logical_busy(cmd: ElsCommand, attempt: u32, plan: &mut Plan) {
    match cmd {
        ElsCommand::Plogi | ElsCommand::Prli | ElsCommand::Adisc => {
            plan.delay_ms = SLOW_RETRY_MS;
            plan.max_tries = BUSY_MAX_TRIES;
        }
        ElsCommand::Fdisc => {
            plan.max_tries = BUSY_MAX_TRIES;
            if attempt >= FLOGI_SLOW_AFTER {
                plan.delay_ms = SLOW_RETRY_MS;
            }
        }
        ElsCommand::Flogi => {
            plan.delay_ms = SLOW_RETRY_MS;
        }
        _ => {}
    }
}

fn is_busy_class(status: &CompletionStatus) -> bool {
    match status {
        CompletionStatus::Busy { .. } => true,
        CompletionStatus::LsReject(rjt) => rjt.reason == RjtReason::LogicalBusy,
        _ => false,
    }
}

/// Gate backoff armed by a busy response, independent of [`decide`].
pub fn fabric_backoff(policy: &RetryPolicy, status: &CompletionStatus) -> Option<u64> {
    if status.is_busy() {
        Some(policy.fabric_busy_backoff_ms)
    } else {
        None
    }
}
