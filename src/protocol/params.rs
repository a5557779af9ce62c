//! Login parameters carried by FLOGI/PLOGI/PRLI/ADISC payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{Did, Wwn};

/// Upper-layer protocol negotiated by PRLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fc4Type {
    /// SCSI over Fibre Channel (block storage).
    Fcp,
    /// NVMe over Fibre Channel.
    Nvme,
}

impl Fc4Type {
    /// FC-4 TYPE code used in the PRLI service parameter page.
    pub fn type_code(&self) -> u8 {
        match self {
            Fc4Type::Fcp => 0x08,
            Fc4Type::Nvme => 0x28,
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Fc4Type::Fcp => 0x01,
            Fc4Type::Nvme => 0x02,
        }
    }
}

impl fmt::Display for Fc4Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fc4Type::Fcp => write!(f, "fcp"),
            Fc4Type::Nvme => write!(f, "nvme"),
        }
    }
}

/// Set of FC-4 types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fc4Types(u8);

impl Fc4Types {
    /// The empty set.
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, fc4: Fc4Type) {
        self.0 |= fc4.bit();
    }

    pub fn remove(&mut self, fc4: Fc4Type) {
        self.0 &= !fc4.bit();
    }

    pub fn contains(&self, fc4: Fc4Type) -> bool {
        self.0 & fc4.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate in PRLI send order (FCP before NVMe).
    pub fn iter(&self) -> impl Iterator<Item = Fc4Type> + '_ {
        [Fc4Type::Fcp, Fc4Type::Nvme]
            .into_iter()
            .filter(move |t| self.contains(*t))
    }
}

impl FromIterator<Fc4Type> for Fc4Types {
    fn from_iter<I: IntoIterator<Item = Fc4Type>>(iter: I) -> Self {
        let mut set = Fc4Types::empty();
        for fc4 in iter {
            set.insert(fc4);
        }
        set
    }
}

/// Common and class service parameters from a FLOGI/FDISC/PLOGI/PDISC
/// payload, reduced to the fields the login engine acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceParams {
    /// Sender's port name.
    pub wwpn: Wwn,
    /// Sender's node name.
    pub wwnn: Wwn,
    /// F_Port indicator: set when the responder is a fabric port.
    pub fabric_port: bool,
    /// Clean address indicator: the fabric guarantees the assigned address
    /// was not recently used by another port.
    pub clean_address: bool,
    /// Resource allocation timeout in milliseconds.
    pub r_a_tov_ms: u32,
    /// Error detect timeout in milliseconds.
    pub e_d_tov_ms: u32,
    /// Buffer-to-buffer credit.
    pub bb_credit: u16,
    /// Receive data field size.
    pub rcv_size: u16,
}

impl ServiceParams {
    /// N_Port parameters with the given names and standard timeouts.
    pub fn new(wwpn: Wwn, wwnn: Wwn) -> Self {
        Self {
            wwpn,
            wwnn,
            fabric_port: false,
            clean_address: false,
            r_a_tov_ms: 10_000,
            e_d_tov_ms: 2_000,
            bb_credit: 16,
            rcv_size: 2112,
        }
    }

    /// Mark as coming from a fabric port.
    pub fn fabric(mut self) -> Self {
        self.fabric_port = true;
        self
    }

    /// Set the clean address indicator.
    pub fn with_clean_address(mut self) -> Self {
        self.clean_address = true;
        self
    }
}

/// PRLI service parameter page for one FC-4 type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrliParams {
    pub fc4: Fc4Type,
    pub initiator: bool,
    pub target: bool,
}

impl PrliParams {
    /// Page advertising an initiator.
    pub fn initiator(fc4: Fc4Type) -> Self {
        Self {
            fc4,
            initiator: true,
            target: false,
        }
    }

    /// Page advertising a target.
    pub fn target(fc4: Fc4Type) -> Self {
        Self {
            fc4,
            initiator: false,
            target: true,
        }
    }
}

/// ADISC payload: the sender's current identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdiscParams {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    pub did: Did,
}
