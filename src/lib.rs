//! fcels: Fibre Channel ELS Login Engine
//!
//! Fabric login, remote-port discovery and per-node login state for one
//! local N_Port, driven by completions and unsolicited frames delivered by a
//! link driver.

pub mod config;
pub mod discovery;
pub mod exchange;
pub mod gate;
pub mod identity;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod timer;
pub mod transport;

// Re-export identity types
pub use identity::{Did, IdentityError, Wwn};

// Re-export config types
pub use config::{Config, ConfigError, PortConfig, PortKind, SimConfig, SimPeer, SimTopology};

// Re-export protocol types
pub use protocol::{
    Completion, CompletionStatus, ElsCommand, ElsReply, Fc4Type, Fc4Types, InboundEls,
    InboundRequest, LsRjt, ProtocolError, RscnPayload, ServiceParams,
};

// Re-export registry types
pub use registry::{NodeHandle, NodeRegistry, NodeState, RegistryError, RemoteNode};

// Re-export retry types
pub use retry::{decide, RetryAction, RetryInput, RetryPolicy, Topology};

// Re-export transport types
pub use transport::sim::SimFabric;
pub use transport::{
    link_event_channel, LinkDriver, LinkEvent, LinkEventRx, LinkEventTx, LoginHandle,
    TransportError,
};

// Re-export port types
pub use port::{now_ms, AdminCommand, Port, PortError, PortEvent, PortState};
