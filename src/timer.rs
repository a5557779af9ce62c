//! One-shot timer queue polled by the port's event loop.
//!
//! Timers never touch node state themselves. When an entry comes due the
//! port receives its [`TimerKind`] and re-issues work through the normal
//! send path. Cancelling removes the entry; a token that no longer matches
//! the owner's record is treated as stale when it fires.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::exchange::ExchangeId;
use crate::registry::NodeHandle;

/// Identifies one scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// What a timer does when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Resend the node's delayed retry record.
    DelayedRetry { node: NodeHandle },
    /// The fabric gate's blocked-until deadline elapsed.
    GateUnblock,
    /// An exchange received no completion before its deadline.
    ExchangeDeadline { id: ExchangeId },
}

/// Ordered set of pending one-shot timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<(u64, TimerToken), TimerKind>,
    deadlines: HashMap<TimerToken, u64>,
    next_token: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer to fire at `deadline_ms`.
    pub fn schedule(&mut self, deadline_ms: u64, kind: TimerKind) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.entries.insert((deadline_ms, token), kind);
        self.deadlines.insert(token, deadline_ms);
        token
    }

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.deadlines.remove(&token) {
            Some(deadline) => self.entries.remove(&(deadline, token)).is_some(),
            None => false,
        }
    }

    /// Whether a timer is still pending.
    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.deadlines.contains_key(&token)
    }

    /// Remove and return all timers due at `now_ms`, earliest first.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<(TimerToken, TimerKind)> {
        let mut due = Vec::new();
        while let Some((&(deadline, token), _)) = self.entries.first_key_value() {
            if deadline > now_ms {
                break;
            }
            if let Some(kind) = self.entries.remove(&(deadline, token)) {
                self.deadlines.remove(&token);
                due.push((token, kind));
            }
        }
        due
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }
}
