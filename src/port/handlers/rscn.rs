//! RSCN reconciliation.

use tracing::{debug, info, warn};

use crate::discovery::{RscnQueued, RscnWork};
use crate::port::{Port, PortEvent, PortState};
use crate::protocol::RscnPayload;
use crate::registry::{NodeEvent, NodeHandle};
use crate::transport::LinkDriver;

impl<D: LinkDriver> Port<D> {
    /// An accepted RSCN: forward it and queue its pages.
    pub(crate) fn rscn_received(&mut self, payload: RscnPayload, now_ms: u64) {
        info!(pages = payload.pages.len(), "RSCN received");
        self.emit(PortEvent::RscnReceived(payload.clone()));

        match self.window.queue_rscn(payload) {
            RscnQueued::Queued => {}
            RscnQueued::Coalesced => debug!("RSCN pages already queued"),
            RscnQueued::FullRediscovery => {
                debug!("RSCN queue full, falling back to full rediscovery")
            }
        }

        if self.window.is_active() || self.state != PortState::Ready {
            debug!(
                queued = self.window.queued_rscns(),
                state = %self.state,
                "RSCN deferred"
            );
            return;
        }
        self.process_rscn(now_ms);
    }

    /// Recover every node named by the queued RSCNs and resume discovery.
    pub(crate) fn process_rscn(&mut self, now_ms: u64) {
        self.window.set_rscn_in_progress(true);
        let use_adisc = self.config.discovery.use_adisc;

        let affected: Vec<NodeHandle> = match self.window.take_rscn() {
            RscnWork::None => Vec::new(),
            RscnWork::Pages(pages) => {
                let scope = RscnPayload::new(pages);
                self.registry
                    .iter()
                    .filter(|(_, n)| !n.did.is_fabric_service())
                    .filter_map(|(h, n)| {
                        scope.best_match(n.did).map(|format| {
                            debug!(did = %n.did, format = ?format, "RSCN affects node");
                            h
                        })
                    })
                    .collect()
            }
            RscnWork::Full => self
                .registry
                .iter()
                .filter(|(_, n)| !n.did.is_fabric_service())
                .map(|(h, _)| h)
                .collect(),
        };

        debug!(nodes = affected.len(), "Processing RSCN");
        for node in affected {
            self.apply_event(node, NodeEvent::DeviceRecovery { use_adisc }, None, now_ms);
        }

        if self.window.is_fabric {
            self.window.set_ns_query_pending(true);
            if let Err(e) = self.driver.query_name_server() {
                warn!(error = %e, "Name server query failed");
                self.window.set_ns_query_pending(false);
                self.discovery_start(now_ms);
            }
        } else {
            self.discovery_start(now_ms);
        }
    }
}
