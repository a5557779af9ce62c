//! Timer expiry: delayed retries, gate unblock and exchange deadlines.
//!
//! Timers never change node state directly. A fired delayed retry goes
//! back through `issue_els`, a deadline through `complete_exchange`.

use tracing::{debug, trace, warn};

use crate::exchange::ElsRequest;
use crate::port::{Port, PortState};
use crate::registry::{DelayedRetry, NodeHandle, NodeState};
use crate::timer::{TimerKind, TimerToken};
use crate::transport::LinkDriver;

impl<D: LinkDriver> Port<D> {
    /// Fire every timer due at `now_ms`.
    pub fn poll_timers(&mut self, now_ms: u64) {
        loop {
            let due = self.timers.pop_due(now_ms);
            if due.is_empty() {
                break;
            }
            for (token, kind) in due {
                match kind {
                    TimerKind::DelayedRetry { node } => {
                        self.fire_delayed_retry(node, token, now_ms)
                    }
                    TimerKind::GateUnblock => {
                        if self.gate_timer == Some(token) {
                            self.gate_timer = None;
                        }
                        trace!("Gate unblock timer");
                        self.drain_gate(now_ms);
                    }
                    TimerKind::ExchangeDeadline { id } => {
                        if self.deadline_timers.get(&id) == Some(&token) {
                            self.deadline_timers.remove(&id);
                            self.exchange_timed_out(id, now_ms);
                        }
                    }
                }
            }
            self.run_deferred(now_ms);
        }
    }

    fn fire_delayed_retry(&mut self, node: NodeHandle, token: TimerToken, now_ms: u64) {
        let record = match self.registry.get_mut(node) {
            Ok(n) if n.delayed_retry.as_ref().map(|r| r.token) == Some(token) => {
                n.flags.delayed_retry_armed = false;
                n.delayed_retry.take()
            }
            _ => None,
        };
        let Some(record) = record else {
            trace!(node = %node, "Stale delayed retry timer");
            return;
        };

        let valid = self.delayed_retry_valid(node, &record);
        let issued = valid
            && match self.issue_els(node, record.request, record.attempt, record.discovery, now_ms)
            {
                Ok(id) => {
                    debug!(node = %node, id = %id, attempt = record.attempt, "Delayed retry sent");
                    true
                }
                Err(e) => {
                    warn!(node = %node, request = %record.request, error = %e, "Delayed retry failed");
                    false
                }
            };
        if !valid {
            debug!(node = %node, request = %record.request, "Delayed retry no longer applies");
        }

        if !issued && record.discovery {
            self.window.release();
            self.discovery_kick = true;
        }
        self.release_node(node);
    }

    /// Whether the node still waits for the request the record resends.
    fn delayed_retry_valid(&self, node: NodeHandle, record: &DelayedRetry) -> bool {
        let Ok(n) = self.registry.get(node) else {
            return false;
        };
        match record.request {
            ElsRequest::Plogi => n.state == NodeState::NotPresent,
            ElsRequest::Prli(_) => n.state == NodeState::PrliIssued,
            ElsRequest::Adisc => n.state == NodeState::AdiscIssued,
            ElsRequest::Flogi | ElsRequest::Fdisc => self.state == PortState::FlogiIssued,
            ElsRequest::Logo(_) | ElsRequest::Scr | ElsRequest::Generic { .. } => true,
        }
    }
}
