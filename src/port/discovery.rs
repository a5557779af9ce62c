//! Discovery fan-out: ADISC then PLOGI passes over pending nodes, bounded
//! by the discovery window.

use tracing::{debug, info, trace, warn};

use super::{Port, PortEvent, PortState};
use crate::discovery::DiscoveryPhase;
use crate::exchange::ElsRequest;
use crate::registry::{NodeHandle, NodeState, RemoteNode};
use crate::transport::LinkDriver;

fn is_candidate(node: &RemoteNode, phase: DiscoveryPhase) -> bool {
    if node.did.is_well_known()
        || node.state != NodeState::NotPresent
        || node.delayed_retry.is_some()
        || node.login_exchange.is_some()
    {
        return false;
    }
    match phase {
        DiscoveryPhase::Adisc => node.flags.adisc_pending,
        DiscoveryPhase::Plogi => node.flags.discovery_pending && !node.flags.adisc_pending,
        DiscoveryPhase::Idle => false,
    }
}

/// Idle leftovers removed when a pass completes.
fn is_stale(node: &RemoteNode) -> bool {
    !node.did.is_well_known()
        && node.state == NodeState::NotPresent
        && !node.flags.discovery_pending
        && !node.flags.adisc_pending
        && !node.flags.register_in_progress
        && node.delayed_retry.is_none()
        && node.login_exchange.is_none()
}

impl<D: LinkDriver> Port<D> {
    /// Begin (or resume) a discovery pass.
    pub(crate) fn discovery_start(&mut self, now_ms: u64) {
        let adisc = self
            .registry
            .iter()
            .any(|(_, n)| is_candidate(n, DiscoveryPhase::Adisc));
        let phase = if adisc {
            DiscoveryPhase::Adisc
        } else {
            DiscoveryPhase::Plogi
        };
        debug!(phase = %phase, outstanding = self.window.outstanding(), "Discovery start");
        self.window.set_phase(phase);
        self.continue_discovery(now_ms);
    }

    /// A PLOGI discovery slot freed up.
    pub(crate) fn more_plogi(&mut self, now_ms: u64) {
        self.window.release();
        self.continue_discovery(now_ms);
    }

    /// An ADISC discovery slot freed up.
    pub(crate) fn more_adisc(&mut self, now_ms: u64) {
        self.window.release();
        self.continue_discovery(now_ms);
    }

    pub(crate) fn continue_discovery(&mut self, now_ms: u64) {
        if !self.link_up {
            return;
        }
        self.window.clear_more_pending();

        match self.window.phase() {
            DiscoveryPhase::Idle => return,
            DiscoveryPhase::Adisc => {
                self.scan(DiscoveryPhase::Adisc, now_ms);
                if self.window.outstanding() == 0 && !self.window.more_pending() {
                    trace!("ADISC pass done, starting PLOGI pass");
                    self.window.set_phase(DiscoveryPhase::Plogi);
                    self.scan(DiscoveryPhase::Plogi, now_ms);
                }
            }
            DiscoveryPhase::Plogi => self.scan(DiscoveryPhase::Plogi, now_ms),
        }

        self.check_discovery_done(now_ms);
    }

    /// Issue one exchange per candidate node until the window fills.
    fn scan(&mut self, phase: DiscoveryPhase, now_ms: u64) {
        let candidates: Vec<NodeHandle> = self
            .registry
            .iter()
            .filter(|(_, n)| is_candidate(n, phase))
            .map(|(h, _)| h)
            .collect();
        let request = match phase {
            DiscoveryPhase::Adisc => ElsRequest::Adisc,
            _ => ElsRequest::Plogi,
        };

        for node in candidates {
            // An earlier issue in this scan may have completed synchronously.
            match self.registry.get(node) {
                Ok(n) if is_candidate(n, phase) => {}
                _ => continue,
            }
            if !self.window.try_acquire() {
                trace!(outstanding = self.window.outstanding(), "Discovery window full");
                break;
            }
            if let Err(e) = self.issue_els(node, request, 0, true, now_ms) {
                warn!(node = %node, request = %request, error = %e, "Discovery issue failed");
                self.window.release();
                if let Ok(n) = self.registry.get_mut(node) {
                    n.flags.clear_pending();
                }
            }
        }
    }

    pub(crate) fn check_discovery_done(&mut self, now_ms: u64) {
        if self.window.phase() != DiscoveryPhase::Idle && self.window.is_drained() {
            self.discovery_complete(now_ms);
        }
    }

    fn discovery_complete(&mut self, now_ms: u64) {
        self.window.set_phase(DiscoveryPhase::Idle);

        let stale: Vec<NodeHandle> = self
            .registry
            .iter()
            .filter(|(_, n)| is_stale(n))
            .map(|(h, _)| h)
            .collect();
        for node in stale {
            trace!(node = %node, "Removing idle node");
            self.remove_node_handle(node, now_ms);
        }

        if self.window.has_rscn_work() {
            debug!("Discovery pass done, processing queued RSCNs");
            self.process_rscn(now_ms);
            return;
        }
        self.window.set_rscn_in_progress(false);

        if matches!(
            self.state,
            PortState::FabricLoginInProgress
                | PortState::PointToPointNegotiation
                | PortState::LoopDiscovery
        ) {
            // A point-to-point port that waits for the peer is not done
            // until the peer has logged in.
            let waiting = self.state == PortState::PointToPointNegotiation
                && !self
                    .registry
                    .iter()
                    .any(|(_, n)| !n.did.is_well_known() && n.state.is_logged_in());
            if waiting {
                debug!("Point-to-point discovery waiting for the peer");
                return;
            }
            self.state = PortState::Ready;
        }

        let mapped = self
            .registry
            .iter()
            .filter(|(_, n)| n.state == NodeState::Mapped)
            .count();
        info!(nodes = self.registry.len(), mapped, "Discovery complete");
        self.emit(PortEvent::DiscoveryComplete);
    }
}
