//! Simulated fabric configuration (`sim.*`).
//!
//! Describes the fabric the bundled simulator presents to a port: its
//! topology, the address it assigns and the remote ports it hosts.

use serde::{Deserialize, Serialize};

use crate::identity::{Did, Wwn};
use crate::protocol::Fc4Type;

/// Link topology presented by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimTopology {
    /// Switched fabric with a name server.
    #[default]
    Fabric,
    /// Direct N_Port to N_Port link; the first peer is the other end.
    PointToPoint,
    /// Arbitrated loop without a fabric.
    Loop,
}

/// A remote port hosted by the simulator (`sim.peers[]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPeer {
    pub did: Did,
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    /// Advertise a target role in PRLI.
    #[serde(default = "SimPeer::default_target")]
    pub target: bool,
    /// FC-4 types the peer accepts PRLI for.
    #[serde(default = "SimPeer::default_fc4_types")]
    pub fc4_types: Vec<Fc4Type>,
}

impl SimPeer {
    fn default_target() -> bool { true }
    fn default_fc4_types() -> Vec<Fc4Type> { vec![Fc4Type::Fcp] }

    /// A target peer speaking FCP.
    pub fn target(did: Did, wwpn: Wwn, wwnn: Wwn) -> Self {
        Self {
            did,
            wwpn,
            wwnn,
            target: true,
            fc4_types: Self::default_fc4_types(),
        }
    }
}

/// Simulator settings (`sim.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub topology: SimTopology,
    /// Fabric port name returned in the FLOGI accept (`sim.fabric_wwpn`).
    #[serde(default = "SimConfig::default_fabric_wwpn")]
    pub fabric_wwpn: Wwn,
    /// Fabric node name (`sim.fabric_wwnn`).
    #[serde(default = "SimConfig::default_fabric_wwnn")]
    pub fabric_wwnn: Wwn,
    /// Address assigned to the local port (`sim.assigned_did`).
    #[serde(default = "SimConfig::default_assigned_did")]
    pub assigned_did: Did,
    /// FLOGI attempts answered with a fabric busy before accepting
    /// (`sim.flogi_busy`).
    #[serde(default)]
    pub flogi_busy: u32,
    /// Remote ports (`sim.peers`).
    #[serde(default = "SimConfig::default_peers")]
    pub peers: Vec<SimPeer>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            topology: SimTopology::Fabric,
            fabric_wwpn: Self::default_fabric_wwpn(),
            fabric_wwnn: Self::default_fabric_wwnn(),
            assigned_did: Self::default_assigned_did(),
            flogi_busy: 0,
            peers: Self::default_peers(),
        }
    }
}

impl SimConfig {
    fn default_fabric_wwpn() -> Wwn { Wwn::new(0x2001_000d_ec00_0001) }
    fn default_fabric_wwnn() -> Wwn { Wwn::new(0x2000_000d_ec00_0001) }
    fn default_assigned_did() -> Did { Did::from_u24(0x01_01_00) }
    fn default_peers() -> Vec<SimPeer> {
        vec![
            SimPeer::target(
                Did::from_u24(0x01_02_00),
                Wwn::new(0x5000_0000_0000_0201),
                Wwn::new(0x5000_0000_0000_0200),
            ),
            SimPeer::target(
                Did::from_u24(0x01_03_00),
                Wwn::new(0x5000_0000_0000_0301),
                Wwn::new(0x5000_0000_0000_0300),
            ),
        ]
    }

    /// Look up a hosted peer by address.
    pub fn peer(&self, did: Did) -> Option<&SimPeer> {
        self.peers.iter().find(|p| p.did == did)
    }

    pub(super) fn merge(&mut self, other: SimConfig) {
        if other != SimConfig::default() {
            *self = other;
        }
    }
}
