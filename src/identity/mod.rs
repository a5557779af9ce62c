//! Fibre Channel Port Identity
//!
//! Two kinds of identifiers name a Fibre Channel port:
//!
//! - [`Did`]: the 24-bit N_Port address (domain, area, port) assigned by the
//!   fabric or chosen provisionally on point-to-point links. Frames are
//!   routed by DID and the node registry is keyed by it.
//! - [`Wwn`]: the 64-bit World Wide Name. Every port carries a port name
//!   (WWPN) and a node name (WWNN). Names are stable across logins, while a
//!   DID may change whenever the fabric reassigns addresses.

mod did;
mod wwn;

use thiserror::Error;

pub use did::Did;
pub use wwn::Wwn;

/// Errors that can occur parsing or constructing identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("DID out of range: 0x{0:x} does not fit in 24 bits")]
    DidOutOfRange(u32),

    #[error("invalid DID '{0}'")]
    InvalidDid(String),

    #[error("invalid WWN '{0}': expected 8 colon-separated hex bytes or 16 hex digits")]
    InvalidWwn(String),
}
