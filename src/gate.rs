//! Fabric serialization gate.
//!
//! At most one fabric login exchange (FLOGI or FDISC) may be outstanding per
//! port. Further fabric exchanges queue in FIFO order and are admitted one
//! at a time as the in-flight one completes. A busy response from the
//! fabric blocks the gate for a short interval; the port's timer resumes
//! draining once it elapses.

use std::collections::VecDeque;

use crate::exchange::ExchangeId;

/// Result of submitting an exchange to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The exchange owns the in-flight slot and may be sent now.
    Admitted,
    /// The exchange waits in the queue.
    Queued,
}

/// Per-port fabric gate state.
#[derive(Debug, Default)]
pub struct FabricGate {
    in_flight: Option<ExchangeId>,
    queue: VecDeque<ExchangeId>,
    blocked_until_ms: Option<u64>,
}

impl FabricGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an exchange if the slot is free and the gate unblocked,
    /// otherwise queue it.
    pub fn submit(&mut self, id: ExchangeId, now_ms: u64) -> Admission {
        if self.in_flight.is_none() && !self.is_blocked(now_ms) && self.queue.is_empty() {
            self.in_flight = Some(id);
            Admission::Admitted
        } else {
            self.queue.push_back(id);
            Admission::Queued
        }
    }

    /// Release the slot held by `id`. Returns false if `id` was not the
    /// in-flight exchange; a queued `id` is dropped from the queue.
    pub fn complete(&mut self, id: ExchangeId) -> bool {
        if self.in_flight == Some(id) {
            self.in_flight = None;
            true
        } else {
            self.queue.retain(|queued| *queued != id);
            false
        }
    }

    /// Pop the next queued exchange into the slot, if the slot is free and
    /// the gate is not blocked.
    pub fn next_ready(&mut self, now_ms: u64) -> Option<ExchangeId> {
        if self.in_flight.is_some() || self.is_blocked(now_ms) {
            return None;
        }
        let id = self.queue.pop_front()?;
        self.in_flight = Some(id);
        Some(id)
    }

    /// Suppress admission until `deadline_ms`. A later deadline extends an
    /// earlier one.
    pub fn block_until(&mut self, deadline_ms: u64) {
        self.blocked_until_ms = Some(match self.blocked_until_ms {
            Some(current) => current.max(deadline_ms),
            None => deadline_ms,
        });
    }

    pub fn is_blocked(&self, now_ms: u64) -> bool {
        matches!(self.blocked_until_ms, Some(until) if now_ms < until)
    }

    pub fn blocked_until(&self) -> Option<u64> {
        self.blocked_until_ms
    }

    pub fn in_flight(&self) -> Option<ExchangeId> {
        self.in_flight
    }

    /// Number of exchanges holding the slot (zero or one).
    pub fn in_flight_count(&self) -> usize {
        usize::from(self.in_flight.is_some())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Empty the gate, returning every exchange it held (in-flight first).
    pub fn reset(&mut self) -> Vec<ExchangeId> {
        let mut drained: Vec<ExchangeId> = self.in_flight.take().into_iter().collect();
        drained.extend(self.queue.drain(..));
        self.blocked_until_ms = None;
        drained
    }
}
