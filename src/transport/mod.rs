//! Link Driver Abstractions
//!
//! The login engine never touches adapter hardware. Everything it needs
//! from below is expressed by [`LinkDriver`]: transmit a request or reply,
//! register or unregister a login handle, abort an exchange, query the name
//! server, read the loop map, reset the link.
//!
//! Driver calls never block. Outcomes that arrive later (exchange
//! completions, login registrations, name-server answers, unsolicited
//! frames, link state changes) are delivered as [`LinkEvent`]s over a
//! channel consumed by the port's event loop.

pub mod sim;

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::exchange::{ExchangeId, ExchangeRequest};
use crate::identity::Did;
use crate::protocol::{Completion, ElsReply, InboundEls, LocalReject, ServiceParams};
use crate::registry::NodeHandle;

// ============================================================================
// Errors
// ============================================================================

/// Errors reported synchronously by a link driver.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is down")]
    LinkDown,

    #[error("no resources to send {0}")]
    NoResources(ExchangeId),

    #[error("unknown exchange {0}")]
    UnknownExchange(ExchangeId),

    #[error("unknown login handle {0}")]
    UnknownLogin(LoginHandle),

    #[error("link reset failed: {0}")]
    ResetFailed(String),

    #[error("event channel closed")]
    ChannelClosed,
}

// ============================================================================
// Login Handles
// ============================================================================

/// Adapter-side handle for a registered port login.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoginHandle(u32);

impl LoginHandle {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LoginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpi{}", self.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Asynchronous notification from the link driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link came up.
    LinkUp,
    /// Link went down.
    LinkDown,
    /// An exchange finished.
    Completion { id: ExchangeId, completion: Completion },
    /// Unsolicited ELS request.
    Inbound(InboundEls),
    /// Answer to [`LinkDriver::register_login`].
    LoginRegistered {
        node: NodeHandle,
        did: Did,
        result: Result<LoginHandle, LocalReject>,
    },
    /// Answer to [`LinkDriver::query_name_server`]: every N_Port the name
    /// server knows, excluding our own.
    NameServerEntries(Vec<Did>),
}

/// Sender half of the link event channel, held by the driver.
pub type LinkEventTx = mpsc::Sender<LinkEvent>;
/// Receiver half of the link event channel, consumed by the port.
pub type LinkEventRx = mpsc::Receiver<LinkEvent>;

/// Create a bounded link event channel.
pub fn link_event_channel(buffer: usize) -> (LinkEventTx, LinkEventRx) {
    mpsc::channel(buffer)
}

// ============================================================================
// Driver Trait
// ============================================================================

/// Operations the login engine consumes from the adapter driver.
pub trait LinkDriver {
    /// Whether the link is currently up.
    fn link_up(&self) -> bool;

    /// Transmit an ELS request. The outcome arrives as
    /// [`LinkEvent::Completion`].
    fn send_exchange(&mut self, request: &ExchangeRequest) -> Result<(), TransportError>;

    /// Transmit a reply to an unsolicited request.
    fn send_reply(&mut self, reply: &ElsReply) -> Result<(), TransportError>;

    /// Register a port login with the adapter. The outcome arrives as
    /// [`LinkEvent::LoginRegistered`].
    fn register_login(
        &mut self,
        node: NodeHandle,
        did: Did,
        params: &ServiceParams,
    ) -> Result<(), TransportError>;

    /// Release a registered login handle.
    fn unregister_login(&mut self, handle: LoginHandle) -> Result<(), TransportError>;

    /// Abort an outstanding exchange. No completion is delivered for it.
    fn abort_exchange(&mut self, id: ExchangeId) -> Result<(), TransportError>;

    /// Ask the name server for its port list. The answer arrives as
    /// [`LinkEvent::NameServerEntries`].
    fn query_name_server(&mut self) -> Result<(), TransportError>;

    /// Addresses seen on an arbitrated loop.
    fn loop_map(&self) -> Vec<Did>;

    /// Bounce the link. A `LinkDown`/`LinkUp` pair follows.
    fn reset_link(&mut self) -> Result<(), TransportError>;
}
