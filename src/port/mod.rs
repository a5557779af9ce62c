//! Local Port
//!
//! Top-level structure for one local N_Port. The Port owns every piece of
//! login-engine state: the node registry, outstanding exchanges, the
//! fabric gate, the discovery window and the timer queue. All of it is
//! mutated from a single context, the port's event loop, which consumes
//! [`LinkEvent`]s from the driver, [`AdminCommand`]s from the
//! administrative layer, and timer ticks.

mod discovery;
mod handlers;
mod issue;
mod lifecycle;
mod sequencer;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError, PortKind};
use crate::discovery::DiscoveryWindow;
use crate::exchange::{Exchange, ExchangeId, ExchangeRequest};
use crate::gate::FabricGate;
use crate::identity::{Did, Wwn};
use crate::protocol::{Fc4Types, RscnPayload, ServiceParams};
use crate::registry::{NodeRegistry, RegistryError, RemoteNode};
use crate::retry::{RetryPolicy, Topology};
use crate::timer::{TimerQueue, TimerToken};
use crate::transport::{LinkDriver, LinkEvent, TransportError};

pub use handlers::now_ms;

/// Errors related to port operations.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("link is down")]
    LinkDown,

    #[error("login already in progress for {0}")]
    LoginInProgress(Did),

    #[error("no node at {0}")]
    NodeNotFound(Did),

    #[error("port is shutting down")]
    ShuttingDown,

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Fabric login sequencer state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    /// Link is down.
    LinkDown,
    /// Link is up, fabric login not yet sent.
    Init,
    /// FLOGI or FDISC outstanding.
    FlogiIssued,
    /// Logged in to a switched fabric; name-server login and discovery
    /// running.
    FabricLoginInProgress,
    /// Point-to-point peer negotiation.
    PointToPointNegotiation,
    /// Fabric login gave up on a loop; discovering from the loop map.
    LoopDiscovery,
    /// First discovery pass finished.
    Ready,
    /// Fabric login failed for good, or the link is looped back.
    Failed,
}

impl PortState {
    /// Whether a fabric or point-to-point login has completed.
    pub fn is_logged_in(&self) -> bool {
        matches!(
            self,
            PortState::FabricLoginInProgress
                | PortState::PointToPointNegotiation
                | PortState::LoopDiscovery
                | PortState::Ready
        )
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::LinkDown => "link_down",
            PortState::Init => "init",
            PortState::FlogiIssued => "flogi_issued",
            PortState::FabricLoginInProgress => "fabric_login",
            PortState::PointToPointNegotiation => "pt2pt",
            PortState::LoopDiscovery => "loop_discovery",
            PortState::Ready => "ready",
            PortState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Notification delivered to the administrative layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortEvent {
    /// A remote port finished PRLI with a target role.
    NodeMapped { did: Did, wwpn: Wwn, fc4: Fc4Types },
    /// A previously mapped remote port is gone.
    NodeRemoved { did: Did, wwpn: Wwn },
    /// Fabric login settled the link topology.
    TopologyChanged {
        is_fabric: bool,
        is_point_to_point: bool,
    },
    /// An RSCN arrived.
    RscnReceived(RscnPayload),
    /// A discovery pass finished.
    DiscoveryComplete,
    /// The port asked the driver to reset the link.
    LinkReset,
}

/// Administrative trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    StartDiscovery,
    ForceRelogin(Did),
    RemoveNode(Did),
    Shutdown,
}

/// Parameters of the last successful fabric login, compared against the
/// next one to decide whether existing logins survive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FabricSession {
    pub(crate) did: Did,
    pub(crate) fabric_wwpn: Wwn,
    pub(crate) fabric_wwnn: Wwn,
}

/// One local N_Port and its login engine.
pub struct Port<D: LinkDriver> {
    config: Config,
    wwpn: Wwn,
    wwnn: Wwn,
    kind: PortKind,
    fc4_types: Fc4Types,
    policy: RetryPolicy,
    els_timeout_ms: u64,

    driver: D,
    state: PortState,
    my_did: Did,
    link_up: bool,
    unloading: bool,
    session: Option<FabricSession>,

    registry: NodeRegistry,
    exchanges: HashMap<ExchangeId, Exchange>,
    /// Fabric exchanges waiting in the gate queue.
    queued_sends: HashMap<ExchangeId, ExchangeRequest>,
    deadline_timers: HashMap<ExchangeId, TimerToken>,
    /// Exchanges aborted by the port; their completion only releases.
    aborted: HashSet<ExchangeId>,
    next_exchange: u64,

    gate: FabricGate,
    gate_timer: Option<TimerToken>,
    window: DiscoveryWindow,
    timers: TimerQueue,

    /// Events produced while handling another event.
    deferred: VecDeque<LinkEvent>,
    /// A discovery slot was returned outside a completion; rescan after
    /// the current event.
    discovery_kick: bool,
    events: Vec<PortEvent>,
}

impl<D: LinkDriver> Port<D> {
    /// Create a port from configuration and a link driver.
    pub fn new(config: Config, driver: D) -> Result<Self, PortError> {
        config.validate()?;

        let policy = config.retry.policy();
        let els_timeout_ms = config.timers.els_timeout_ms();
        let window = DiscoveryWindow::new(
            config.discovery.max_outstanding,
            config.discovery.rscn_capacity,
        );

        Ok(Self {
            wwpn: config.port.wwpn,
            wwnn: config.port.wwnn,
            kind: config.port.kind,
            fc4_types: config.port.fc4_set(),
            registry: NodeRegistry::new(config.port.max_nodes),
            policy,
            els_timeout_ms,
            config,
            driver,
            state: PortState::LinkDown,
            my_did: Did::UNASSIGNED,
            link_up: false,
            unloading: false,
            session: None,
            exchanges: HashMap::new(),
            queued_sends: HashMap::new(),
            deadline_timers: HashMap::new(),
            aborted: HashSet::new(),
            next_exchange: 0,
            gate: FabricGate::new(),
            gate_timer: None,
            window,
            timers: TimerQueue::new(),
            deferred: VecDeque::new(),
            discovery_kick: false,
            events: Vec::new(),
        })
    }

    // === Accessors ===

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn wwpn(&self) -> Wwn {
        self.wwpn
    }

    pub fn wwnn(&self) -> Wwn {
        self.wwnn
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// Our current N_Port address.
    pub fn my_did(&self) -> Did {
        self.my_did
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Look up an indexed node by address.
    pub fn node(&self, did: Did) -> Option<&RemoteNode> {
        self.registry
            .find(did)
            .and_then(|h| self.registry.get(h).ok())
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn gate(&self) -> &FabricGate {
        &self.gate
    }

    pub fn window(&self) -> &DiscoveryWindow {
        &self.window
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Number of exchanges issued and not yet completed.
    pub fn outstanding_exchanges(&self) -> usize {
        self.exchanges.len()
    }

    pub fn exchange(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.get(&id)
    }

    /// Drain pending port events.
    pub fn take_events(&mut self) -> Vec<PortEvent> {
        std::mem::take(&mut self.events)
    }

    // === Internal Helpers ===

    pub(crate) fn emit(&mut self, event: PortEvent) {
        debug!(event = ?event, "Port event");
        self.events.push(event);
    }

    /// Topology snapshot for retry decisions.
    pub(crate) fn topology(&self) -> Topology {
        Topology {
            link_up: self.link_up,
            port_disabled: self.unloading,
            is_fabric: self.window.is_fabric,
            is_point_to_point: self.window.is_point_to_point,
            is_loop: self.window.is_loop,
            loopback: self.config.port.loopback,
        }
    }

    /// Our service parameters as sent in FLOGI/PLOGI and their replies.
    pub(crate) fn local_params(&self) -> ServiceParams {
        ServiceParams::new(self.wwpn, self.wwnn)
    }

    pub(crate) fn is_virtual(&self) -> bool {
        self.kind == PortKind::Virtual
    }
}

impl<D: LinkDriver> fmt::Debug for Port<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("wwpn", &self.wwpn)
            .field("state", &self.state)
            .field("my_did", &self.my_did)
            .field("nodes", &self.registry.len())
            .field("exchanges", &self.exchanges.len())
            .finish()
    }
}
