//! Identity reconciliation after a port login.
//!
//! A PLOGI (sent or received) tells us which port name lives at a DID. When
//! the registry already knows that port name under another DID the two
//! nodes swap addresses: the node that already carried the identity keeps
//! it and takes over the login in progress, while the node that was created
//! for the address is demoted.

use tracing::debug;

use super::{Fc4Negotiation, NodeHandle, NodeRegistry, NodeState, RegistryError};
use crate::identity::{Did, Wwn};
use crate::transport::LoginHandle;

/// Outcome of [`NodeRegistry::plogi_confirm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciled {
    /// Node now indexed at the confirmed DID and carrying the login.
    pub active: NodeHandle,
    /// Node that gave up the DID, now NOT_PRESENT with empty names.
    pub demoted: Option<NodeHandle>,
    /// Login handles registered under an address that no longer matches
    /// the identity; the caller unregisters them.
    pub stale_logins: Vec<LoginHandle>,
}

impl NodeRegistry {
    /// Record that port `wwpn` / node `wwnn` answers at `did`.
    ///
    /// Idempotent: a second call with the same arguments finds the names
    /// already recorded at `did` and changes nothing.
    pub fn plogi_confirm(
        &mut self,
        did: Did,
        wwpn: Wwn,
        wwnn: Wwn,
    ) -> Result<Reconciled, RegistryError> {
        let active = self.find(did).ok_or(RegistryError::NotFound(did))?;
        match self.find_by_wwpn(wwpn) {
            Some(other) if other != active => self.swap_identity(active, other, wwpn, wwnn),
            _ => self.record_names(active, wwpn, wwnn),
        }
    }

    fn record_names(
        &mut self,
        active: NodeHandle,
        wwpn: Wwn,
        wwnn: Wwn,
    ) -> Result<Reconciled, RegistryError> {
        let node = self.get_mut(active)?;
        let mut stale_logins = Vec::new();

        if !node.wwpn.is_zero() && node.wwpn != wwpn {
            debug!(
                did = %node.did,
                old = %node.wwpn,
                new = %wwpn,
                "Port name changed at address"
            );
            if let Some(handle) = node.login.take() {
                stale_logins.push(handle);
                node.flags.login_registered = false;
            }
        }
        node.wwpn = wwpn;
        node.wwnn = wwnn;

        Ok(Reconciled {
            active,
            demoted: None,
            stale_logins,
        })
    }

    fn swap_identity(
        &mut self,
        issued: NodeHandle,
        known: NodeHandle,
        wwpn: Wwn,
        wwnn: Wwn,
    ) -> Result<Reconciled, RegistryError> {
        let (state, prev_state, flags) = {
            let node = self.get(issued)?;
            (node.state, node.prev_state, node.flags)
        };

        self.swap_dids(issued, known)?;

        let mut stale_logins = Vec::new();

        let winner = self.get_mut(known)?;
        let new_did = winner.did;
        if let Some(handle) = winner.login.take() {
            stale_logins.push(handle);
        }
        winner.state = state;
        winner.prev_state = prev_state;
        winner.flags.discovery_pending = flags.discovery_pending;
        winner.flags.adisc_pending = flags.adisc_pending;
        winner.flags.prli_sent = flags.prli_sent;
        winner.flags.adisc_sent = flags.adisc_sent;
        winner.flags.logo_sent = flags.logo_sent;
        winner.flags.login_registered = false;
        winner.wwpn = wwpn;
        winner.wwnn = wwnn;
        winner.fc4 = Fc4Negotiation::default();

        let loser = self.get_mut(issued)?;
        if let Some(handle) = loser.login.take() {
            stale_logins.push(handle);
        }
        loser.prev_state = loser.state;
        loser.state = NodeState::NotPresent;
        loser.flags.clear_pending();
        loser.flags.clear_sent();
        loser.flags.login_registered = false;
        loser.wwpn = Wwn::ZERO;
        loser.wwnn = Wwn::ZERO;
        loser.fc4 = Fc4Negotiation::default();
        loser.service_params = None;
        let demoted_did = loser.did;

        debug!(
            did = %new_did,
            wwpn = %wwpn,
            demoted_did = %demoted_did,
            "Swapped node identity"
        );

        Ok(Reconciled {
            active: known,
            demoted: Some(issued),
            stale_logins,
        })
    }
}
