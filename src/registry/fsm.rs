//! Per-node login state machine.
//!
//! A pure function from (state, event) to the next state and an ordered
//! list of side effects. The port applies the new state first and then
//! executes the actions in order. Completion events that arrive in a state
//! which no longer expects them produce no transition.

use super::NodeState;
use crate::protocol::{LsRjt, RjtExplanation, RjtReason};

/// Input to the node state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// Unsolicited PLOGI. `we_win` is the collision outcome when our own
    /// PLOGI to the node is outstanding.
    RcvPlogi { we_win: bool },
    RcvPrli,
    RcvLogo,
    RcvAdisc,
    RcvPdisc,
    CmplPlogi { accepted: bool },
    CmplRegLogin { success: bool, fabric_service: bool },
    /// Final PRLI outcome once no FC-4 type remains to send.
    CmplPrli { accepted: bool, target: bool },
    /// `resume` is the logged-in state to return to on success.
    CmplAdisc { accepted: bool, resume: NodeState },
    CmplLogo,
    DeviceRecovery { use_adisc: bool },
    DeviceRm,
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeAction {
    /// Abort the node's outstanding login-sequence exchange.
    AbortLogin,
    /// Release the adapter login handle, if any.
    UnregisterLogin,
    /// Request adapter login registration.
    RegisterLogin,
    /// Start PRLI for the configured FC-4 types.
    IssuePrli,
    /// Accept the unsolicited request.
    Accept,
    /// Reject the unsolicited request.
    Reject(LsRjt),
    /// Report the node to the upper layer as mapped.
    NotifyMapped,
    /// Withdraw the node from the upper layer, if it was reported.
    NotifyRemoved,
    MarkDiscoveryPending,
    MarkAdiscPending,
    ClearPending,
    /// Drop the node from the registry index.
    Remove,
}

/// Outcome of one state machine step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: NodeState,
    pub actions: Vec<NodeAction>,
}

impl Transition {
    fn to(next: NodeState, actions: Vec<NodeAction>) -> Self {
        Self { next, actions }
    }

    fn stay(state: NodeState) -> Self {
        Self {
            next: state,
            actions: Vec::new(),
        }
    }

    /// Whether the step changes nothing.
    pub fn is_noop(&self, from: NodeState) -> bool {
        self.next == from && self.actions.is_empty()
    }
}

fn login_required() -> LsRjt {
    LsRjt::new(RjtReason::UnableToPerform, RjtExplanation::PortLoginRequired)
}

fn command_in_progress() -> LsRjt {
    LsRjt::new(RjtReason::UnableToPerform, RjtExplanation::CommandInProgress)
}

/// Compute the next state and actions for an event.
pub fn transition(state: NodeState, event: NodeEvent) -> Transition {
    use NodeAction::*;
    use NodeState::*;

    match event {
        NodeEvent::DeviceRm => match state {
            Unused | NotPresent => Transition::to(Unused, vec![Remove]),
            Unmapped | Mapped => {
                Transition::to(Unused, vec![UnregisterLogin, NotifyRemoved, Remove])
            }
            _ => Transition::to(
                Unused,
                vec![AbortLogin, UnregisterLogin, NotifyRemoved, Remove],
            ),
        },

        NodeEvent::DeviceRecovery { use_adisc } => match state {
            Unmapped | Mapped if use_adisc => Transition::to(NotPresent, vec![MarkAdiscPending]),
            Unmapped | Mapped => Transition::to(
                NotPresent,
                vec![UnregisterLogin, NotifyRemoved, MarkDiscoveryPending],
            ),
            NotPresent => Transition::to(NotPresent, vec![MarkDiscoveryPending]),
            // Mid-login nodes finish their exchange first.
            _ => Transition::stay(state),
        },

        NodeEvent::RcvPlogi { we_win } => match state {
            PlogiIssued if we_win => Transition::to(state, vec![Reject(command_in_progress())]),
            PlogiIssued | AdiscIssued | RegLoginIssued | PrliIssued | LogoIssued => Transition::to(
                RegLoginIssued,
                vec![AbortLogin, UnregisterLogin, NotifyRemoved, Accept, RegisterLogin],
            ),
            Unmapped | Mapped => Transition::to(
                RegLoginIssued,
                vec![UnregisterLogin, NotifyRemoved, Accept, RegisterLogin],
            ),
            NotPresent | Unused => {
                Transition::to(RegLoginIssued, vec![ClearPending, Accept, RegisterLogin])
            }
        },

        NodeEvent::RcvPrli => match state {
            Unmapped | Mapped | PrliIssued => Transition::to(state, vec![Accept]),
            RegLoginIssued => Transition::to(state, vec![Reject(command_in_progress())]),
            _ => Transition::to(state, vec![Reject(login_required())]),
        },

        NodeEvent::RcvLogo => match state {
            Unmapped | Mapped => Transition::to(
                NotPresent,
                vec![Accept, UnregisterLogin, NotifyRemoved, MarkDiscoveryPending],
            ),
            PlogiIssued | AdiscIssued | RegLoginIssued | PrliIssued | LogoIssued => Transition::to(
                NotPresent,
                vec![AbortLogin, Accept, UnregisterLogin, NotifyRemoved, MarkDiscoveryPending],
            ),
            NotPresent | Unused => Transition::to(state, vec![Accept]),
        },

        NodeEvent::RcvAdisc | NodeEvent::RcvPdisc => match state {
            Unmapped | Mapped => Transition::to(state, vec![Accept]),
            _ => Transition::to(state, vec![Reject(login_required())]),
        },

        NodeEvent::CmplPlogi { accepted } => match state {
            PlogiIssued if accepted => Transition::to(RegLoginIssued, vec![RegisterLogin]),
            PlogiIssued => Transition::to(NotPresent, Vec::new()),
            _ => Transition::stay(state),
        },

        NodeEvent::CmplRegLogin {
            success,
            fabric_service,
        } => match state {
            RegLoginIssued if success && fabric_service => Transition::to(Unmapped, Vec::new()),
            RegLoginIssued if success => Transition::to(PrliIssued, vec![IssuePrli]),
            RegLoginIssued => Transition::to(NotPresent, vec![MarkDiscoveryPending]),
            // A registration that lands after the node moved on is stale.
            NotPresent | Unused | PlogiIssued if success => {
                Transition::to(state, vec![UnregisterLogin])
            }
            _ => Transition::stay(state),
        },

        NodeEvent::CmplPrli { accepted, target } => match state {
            PrliIssued if accepted && target => Transition::to(Mapped, vec![NotifyMapped]),
            PrliIssued => Transition::to(Unmapped, Vec::new()),
            _ => Transition::stay(state),
        },

        NodeEvent::CmplAdisc { accepted, resume } => match state {
            AdiscIssued if accepted => {
                let next = if resume.is_logged_in() { resume } else { Unmapped };
                Transition::to(next, vec![ClearPending])
            }
            AdiscIssued => Transition::to(
                NotPresent,
                vec![UnregisterLogin, NotifyRemoved, MarkDiscoveryPending],
            ),
            _ => Transition::stay(state),
        },

        NodeEvent::CmplLogo => match state {
            LogoIssued => Transition::to(NotPresent, vec![UnregisterLogin, NotifyRemoved]),
            _ => Transition::stay(state),
        },
    }
}
