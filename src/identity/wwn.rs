//! 64-bit World Wide Name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::IdentityError;

/// A 64-bit World Wide Name (port name or node name).
///
/// The zero value means "not yet learned": a node created from a bare
/// address has no names until a login exchange supplies them.
///
/// Ordering is numeric, which matches the byte-wise comparison used to
/// break point-to-point and PLOGI collisions.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wwn(u64);

impl Wwn {
    /// The empty name.
    pub const ZERO: Wwn = Wwn(0);

    /// Create from the raw 64-bit value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Create from the 8 wire bytes (big-endian).
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Wire representation.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether the name has not been learned.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Wwn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wwn({})", self)
    }
}

impl fmt::Display for Wwn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for Wwn {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidWwn(s.to_string());
        let trimmed = s.trim();

        if trimmed.contains(':') {
            let mut bytes = [0u8; 8];
            let mut count = 0;
            for part in trimmed.split(':') {
                if count == 8 || part.len() != 2 {
                    return Err(invalid());
                }
                bytes[count] = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
                count += 1;
            }
            if count != 8 {
                return Err(invalid());
            }
            return Ok(Wwn::from_bytes(bytes));
        }

        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if digits.len() != 16 {
            return Err(invalid());
        }
        u64::from_str_radix(digits, 16).map(Wwn).map_err(|_| invalid())
    }
}

impl Serialize for Wwn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Wwn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
