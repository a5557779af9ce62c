//! Node Registry
//!
//! Arena of [`RemoteNode`]s indexed by DID. Slots are addressed by
//! generation-checked [`NodeHandle`]s, so a handle kept past the node's
//! release fails with [`RegistryError::StaleHandle`] instead of reaching a
//! recycled slot.
//!
//! Each slot carries an explicit strong-reference count. The index holds
//! one reference from `create` until `remove`; every in-flight exchange,
//! armed delayed retry, upper-layer registration and pending login
//! registration holds one more. A slot is recycled only when the count
//! reaches zero, and that can only happen after the node left the index.

mod fsm;
mod node;
mod reconcile;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::identity::{Did, Wwn};

pub use fsm::{transition, NodeAction, NodeEvent, Transition};
pub use node::{DelayedRetry, Fc4Negotiation, NodeFlags, NodeState, RemoteNode};
pub use reconcile::Reconciled;

/// Errors from registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("stale node handle {0}")]
    StaleHandle(NodeHandle),

    #[error("node already exists for DID {0}")]
    DuplicateDid(Did),

    #[error("no node indexed at DID {0}")]
    NotFound(Did),

    #[error("registry exhausted: max {max} nodes")]
    Exhausted { max: usize },

    #[error("node {did} cannot be removed in state {state}")]
    InvalidState { did: Did, state: NodeState },

    #[error("node {0} is not indexed")]
    NotIndexed(Did),

    #[error("reference count underflow on {0}")]
    RefUnderflow(NodeHandle),
}

/// Generation-checked reference to a registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}.{}", self.index, self.generation)
    }
}

/// Result of dropping a strong reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Other references remain.
    Retained(u32),
    /// That was the last reference; the slot was recycled.
    Freed,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    refs: u32,
    indexed: bool,
    node: Option<RemoteNode>,
}

/// Arena of remote nodes keyed by DID.
#[derive(Debug)]
pub struct NodeRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_did: HashMap<Did, NodeHandle>,
    max_nodes: usize,
    live: usize,
}

impl NodeRegistry {
    /// Create a registry holding at most `max_nodes` live nodes, indexed or
    /// awaiting their last release.
    pub fn new(max_nodes: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_did: HashMap::new(),
            max_nodes,
            live: 0,
        }
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.by_did.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_did.is_empty()
    }

    /// Number of slots in use, including removed nodes still referenced.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Look up the node indexed at a DID.
    pub fn find(&self, did: Did) -> Option<NodeHandle> {
        self.by_did.get(&did).copied()
    }

    /// Look up an indexed N_Port by port name. Zero names never match and
    /// well-known addresses are skipped: in point-to-point mode the fabric
    /// node records the peer's names from its FLOGI.
    pub fn find_by_wwpn(&self, wwpn: Wwn) -> Option<NodeHandle> {
        if wwpn.is_zero() {
            return None;
        }
        self.iter()
            .find(|(_, node)| node.wwpn == wwpn && !node.did.is_well_known())
            .map(|(handle, _)| handle)
    }

    /// Create and index a node at a DID. The index holds its first
    /// reference.
    pub fn create(&mut self, did: Did) -> Result<NodeHandle, RegistryError> {
        if self.by_did.contains_key(&did) {
            return Err(RegistryError::DuplicateDid(did));
        }
        if self.live >= self.max_nodes {
            return Err(RegistryError::Exhausted {
                max: self.max_nodes,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    refs: 0,
                    indexed: false,
                    node: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.refs = 1;
        slot.indexed = true;
        slot.node = Some(RemoteNode::new(did));
        let handle = NodeHandle {
            index,
            generation: slot.generation,
        };
        self.by_did.insert(did, handle);
        self.live += 1;

        debug!(did = %did, handle = %handle, "Node created");
        Ok(handle)
    }

    /// Return the node at a DID, creating it if absent.
    pub fn find_or_create(&mut self, did: Did) -> Result<NodeHandle, RegistryError> {
        match self.find(did) {
            Some(handle) => Ok(handle),
            None => self.create(did),
        }
    }

    /// Whether the handle still names a live node.
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.slot(handle).is_ok()
    }

    /// Whether the node is currently in the index.
    pub fn is_indexed(&self, handle: NodeHandle) -> bool {
        self.slot(handle).map(|s| s.indexed).unwrap_or(false)
    }

    pub fn get(&self, handle: NodeHandle) -> Result<&RemoteNode, RegistryError> {
        self.slot(handle)?
            .node
            .as_ref()
            .ok_or(RegistryError::StaleHandle(handle))
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Result<&mut RemoteNode, RegistryError> {
        self.slot_mut(handle)?
            .node
            .as_mut()
            .ok_or(RegistryError::StaleHandle(handle))
    }

    /// Take a strong reference. Returns the new count.
    pub fn get_ref(&mut self, handle: NodeHandle) -> Result<u32, RegistryError> {
        let slot = self.slot_mut(handle)?;
        slot.refs += 1;
        Ok(slot.refs)
    }

    /// Drop a strong reference, recycling the slot on the last one.
    pub fn put_ref(&mut self, handle: NodeHandle) -> Result<Release, RegistryError> {
        let slot = self.slot_mut(handle)?;
        // The index reference is only dropped by `remove`.
        if slot.refs == 0 || (slot.indexed && slot.refs == 1) {
            return Err(RegistryError::RefUnderflow(handle));
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(Release::Retained(slot.refs));
        }

        let did = slot.node.as_ref().map(|n| n.did);
        slot.node = None;
        slot.indexed = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;

        if let Some(did) = did {
            debug!(did = %did, handle = %handle, "Node freed");
        }
        Ok(Release::Freed)
    }

    /// Current strong-reference count.
    pub fn ref_count(&self, handle: NodeHandle) -> Result<u32, RegistryError> {
        Ok(self.slot(handle)?.refs)
    }

    /// Drop the node from the index (DEVICE_RM). Legal only in NOT_PRESENT
    /// or UNUSED. The node becomes UNUSED; the slot is recycled now if the
    /// index held the last reference, otherwise on the last `put_ref`.
    pub fn remove(&mut self, handle: NodeHandle) -> Result<Release, RegistryError> {
        let slot = self.slot(handle)?;
        let node = slot
            .node
            .as_ref()
            .ok_or(RegistryError::StaleHandle(handle))?;
        if !slot.indexed {
            return Err(RegistryError::NotIndexed(node.did));
        }
        if !node.state.is_removable() {
            return Err(RegistryError::InvalidState {
                did: node.did,
                state: node.state,
            });
        }
        let did = node.did;

        if self.by_did.get(&did) == Some(&handle) {
            self.by_did.remove(&did);
        }
        let slot = self.slot_mut(handle)?;
        slot.indexed = false;
        if let Some(node) = slot.node.as_mut() {
            node.set_state(NodeState::Unused);
        }

        debug!(did = %did, handle = %handle, "Node removed from index");
        self.put_ref(handle)
    }

    /// Indexed nodes in ascending DID order.
    pub fn handles(&self) -> Vec<NodeHandle> {
        let mut entries: Vec<(Did, NodeHandle)> =
            self.by_did.iter().map(|(did, h)| (*did, *h)).collect();
        entries.sort_by_key(|(did, _)| *did);
        entries.into_iter().map(|(_, h)| h).collect()
    }

    /// Iterate indexed nodes in ascending DID order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &RemoteNode)> + '_ {
        self.handles()
            .into_iter()
            .filter_map(move |h| self.get(h).ok().map(|node| (h, node)))
    }

    /// Move an indexed node to a DID that is not currently indexed.
    pub(crate) fn reassign_did(&mut self, handle: NodeHandle, did: Did) -> Result<(), RegistryError> {
        let old = self.get(handle)?.did;
        if old == did {
            return Ok(());
        }
        if self.by_did.contains_key(&did) {
            return Err(RegistryError::DuplicateDid(did));
        }
        if self.by_did.get(&old) == Some(&handle) {
            self.by_did.remove(&old);
        }
        self.by_did.insert(did, handle);
        self.get_mut(handle)?.did = did;
        Ok(())
    }

    /// Exchange the DIDs of two indexed nodes in one step.
    pub(crate) fn swap_dids(&mut self, a: NodeHandle, b: NodeHandle) -> Result<(), RegistryError> {
        let did_a = self.get(a)?.did;
        let did_b = self.get(b)?.did;
        self.get_mut(a)?.did = did_b;
        self.get_mut(b)?.did = did_a;
        self.by_did.insert(did_b, a);
        self.by_did.insert(did_a, b);
        Ok(())
    }

    fn slot(&self, handle: NodeHandle) -> Result<&Slot, RegistryError> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.node.is_some() => Ok(slot),
            _ => Err(RegistryError::StaleHandle(handle)),
        }
    }

    fn slot_mut(&mut self, handle: NodeHandle) -> Result<&mut Slot, RegistryError> {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.node.is_some() => Ok(slot),
            _ => Err(RegistryError::StaleHandle(handle)),
        }
    }
}
