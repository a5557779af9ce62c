//! Discovery window: bookkeeping for the fan-out of PLOGI/ADISC exchanges
//! and the queue of pending RSCN notifications.
//!
//! The window only counts. Scanning the registry and issuing exchanges is
//! done by the port, which asks the window for a slot before each send.

use std::collections::VecDeque;
use std::fmt;

use crate::protocol::{RscnPage, RscnPayload};

/// Which discovery pass is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryPhase {
    Idle,
    /// Revalidating surviving logins with ADISC.
    Adisc,
    /// Logging in to pending nodes with PLOGI.
    Plogi,
}

impl fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryPhase::Idle => "idle",
            DiscoveryPhase::Adisc => "adisc",
            DiscoveryPhase::Plogi => "plogi",
        };
        write!(f, "{}", s)
    }
}

/// What happened to a queued RSCN.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RscnQueued {
    /// Appended with at least one new page.
    Queued,
    /// Every page was already queued.
    Coalesced,
    /// Queue capacity exceeded; the next pass rediscovers everything.
    FullRediscovery,
}

/// Work drained from the RSCN queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RscnWork {
    None,
    /// Affected address pages, in arrival order.
    Pages(Vec<RscnPage>),
    /// Recover every known node.
    Full,
}

/// Discovery concurrency window and RSCN queue of one port.
#[derive(Debug)]
pub struct DiscoveryWindow {
    outstanding: usize,
    limit: usize,
    more_pending: bool,
    phase: DiscoveryPhase,
    ns_query_pending: bool,
    rscn_queue: VecDeque<RscnPayload>,
    rscn_capacity: usize,
    full_rediscovery: bool,
    rscn_in_progress: bool,
    pub is_fabric: bool,
    pub is_point_to_point: bool,
    pub is_loop: bool,
}

impl DiscoveryWindow {
    pub fn new(limit: usize, rscn_capacity: usize) -> Self {
        Self {
            outstanding: 0,
            limit: limit.max(1),
            more_pending: false,
            phase: DiscoveryPhase::Idle,
            ns_query_pending: false,
            rscn_queue: VecDeque::new(),
            rscn_capacity,
            full_rediscovery: false,
            rscn_in_progress: false,
            is_fabric: false,
            is_point_to_point: false,
            is_loop: false,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn more_pending(&self) -> bool {
        self.more_pending
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: DiscoveryPhase) {
        self.phase = phase;
    }

    /// Take a slot for one discovery exchange. At the limit, records that
    /// more work is pending and refuses.
    pub fn try_acquire(&mut self) -> bool {
        if self.outstanding >= self.limit {
            self.more_pending = true;
            return false;
        }
        self.outstanding += 1;
        true
    }

    /// Return a slot. Saturates at zero.
    pub fn release(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Clear the "more work pending" marker before a rescan.
    pub fn clear_more_pending(&mut self) {
        self.more_pending = false;
    }

    pub fn ns_query_pending(&self) -> bool {
        self.ns_query_pending
    }

    pub fn set_ns_query_pending(&mut self, pending: bool) {
        self.ns_query_pending = pending;
    }

    /// A discovery pass or name-server query is running.
    pub fn is_active(&self) -> bool {
        self.phase != DiscoveryPhase::Idle || self.outstanding > 0 || self.ns_query_pending
    }

    /// Nothing outstanding and nothing left to scan.
    pub fn is_drained(&self) -> bool {
        self.outstanding == 0 && !self.more_pending && !self.ns_query_pending
    }

    pub fn rscn_in_progress(&self) -> bool {
        self.rscn_in_progress
    }

    pub fn set_rscn_in_progress(&mut self, in_progress: bool) {
        self.rscn_in_progress = in_progress;
    }

    /// Queue an RSCN, dropping pages that are already queued.
    pub fn queue_rscn(&mut self, payload: RscnPayload) -> RscnQueued {
        if self.full_rediscovery {
            return RscnQueued::FullRediscovery;
        }

        let fresh: Vec<RscnPage> = payload
            .pages
            .into_iter()
            .filter(|page| !self.rscn_queue.iter().any(|q| q.pages.contains(page)))
            .collect();
        if fresh.is_empty() {
            return RscnQueued::Coalesced;
        }

        if self.rscn_queue.len() >= self.rscn_capacity {
            self.rscn_queue.clear();
            self.full_rediscovery = true;
            return RscnQueued::FullRediscovery;
        }

        self.rscn_queue.push_back(RscnPayload::new(fresh));
        RscnQueued::Queued
    }

    /// Whether RSCN work is waiting.
    pub fn has_rscn_work(&self) -> bool {
        self.full_rediscovery || !self.rscn_queue.is_empty()
    }

    pub fn queued_rscns(&self) -> usize {
        self.rscn_queue.len()
    }

    /// Drain the RSCN queue.
    pub fn take_rscn(&mut self) -> RscnWork {
        if self.full_rediscovery {
            self.full_rediscovery = false;
            self.rscn_queue.clear();
            return RscnWork::Full;
        }
        if self.rscn_queue.is_empty() {
            return RscnWork::None;
        }
        let pages = self.rscn_queue.drain(..).flat_map(|p| p.pages).collect();
        RscnWork::Pages(pages)
    }

    /// Forget all progress (link down). Topology flags are cleared too.
    pub fn reset(&mut self) {
        self.outstanding = 0;
        self.more_pending = false;
        self.phase = DiscoveryPhase::Idle;
        self.ns_query_pending = false;
        self.rscn_queue.clear();
        self.full_rediscovery = false;
        self.rscn_in_progress = false;
        self.is_fabric = false;
        self.is_point_to_point = false;
        self.is_loop = false;
    }
}
