//! 24-bit N_Port address.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::IdentityError;

const DID_MASK: u32 = 0x00ff_ffff;

/// A 24-bit Fibre Channel port address.
///
/// The address splits into domain (bits 23..16), area (15..8) and port
/// (7..0). Addresses in the 0xFFFFFx range are well-known fabric services.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Did(u32);

impl Did {
    /// Fabric login server (F_Port).
    pub const FABRIC: Did = Did(0x00ff_fffe);
    /// Fabric controller, target of SCR.
    pub const FABRIC_CONTROLLER: Did = Did(0x00ff_fffd);
    /// Directory (name) server.
    pub const NAME_SERVER: Did = Did(0x00ff_fffc);
    /// Provisional address of the winning side of a point-to-point link.
    pub const PT2PT_LOCAL: Did = Did(0x0000_0001);
    /// Provisional address of the losing side of a point-to-point link.
    pub const PT2PT_REMOTE: Did = Did(0x0000_0002);
    /// Address not yet assigned.
    pub const UNASSIGNED: Did = Did(0);

    /// Create a DID, rejecting values wider than 24 bits.
    pub fn new(value: u32) -> Result<Self, IdentityError> {
        if value & !DID_MASK != 0 {
            return Err(IdentityError::DidOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Create a DID from the low 24 bits of a value.
    pub const fn from_u24(value: u32) -> Self {
        Self(value & DID_MASK)
    }

    /// Create a DID from its three wire bytes (big-endian).
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]))
    }

    /// Wire representation (big-endian, 3 bytes).
    pub fn to_bytes(&self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    /// Get the raw 24-bit value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Domain byte.
    pub fn domain(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Area byte.
    pub fn area(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Port byte.
    pub fn port(&self) -> u8 {
        self.0 as u8
    }

    /// Whether this is one of the well-known fabric service addresses.
    pub fn is_well_known(&self) -> bool {
        self.0 >= 0x00ff_f000
    }

    /// Whether this address is a fabric service that takes a port login
    /// but never a process login.
    pub fn is_fabric_service(&self) -> bool {
        matches!(*self, Did::FABRIC | Did::FABRIC_CONTROLLER | Did::NAME_SERVER)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({:06x})", self.0)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl FromStr for Did {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let value =
            u32::from_str_radix(digits, 16).map_err(|_| IdentityError::InvalidDid(s.to_string()))?;
        Did::new(value)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:06x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
