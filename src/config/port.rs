//! Port configuration subsections.
//!
//! The `port.*`, `discovery.*`, `retry.*`, `timers.*` and `buffers.*`
//! parameters of one local port.

use serde::{Deserialize, Serialize};

use crate::identity::Wwn;
use crate::protocol::{Fc4Type, Fc4Types};
use crate::retry::RetryPolicy;

// ============================================================================
// Port Identity
// ============================================================================

/// Physical N_Port or an additional NPIV virtual port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Logs in with FLOGI.
    #[default]
    Physical,
    /// Logs in with FDISC through an already logged-in physical port.
    Virtual,
}

/// Local port identity and capabilities (`port.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port name (`port.wwpn`).
    #[serde(default = "PortConfig::default_wwpn")]
    pub wwpn: Wwn,
    /// Node name (`port.wwnn`).
    #[serde(default = "PortConfig::default_wwnn")]
    pub wwnn: Wwn,
    /// Port kind (`port.kind`).
    #[serde(default)]
    pub kind: PortKind,
    /// FC-4 types to negotiate with PRLI, in send order (`port.fc4_types`).
    #[serde(default = "PortConfig::default_fc4_types")]
    pub fc4_types: Vec<Fc4Type>,
    /// Upper bound on nodes tracked by the registry (`port.max_nodes`).
    #[serde(default = "PortConfig::default_max_nodes")]
    pub max_nodes: usize,
    /// Link is in loopback test mode (`port.loopback`).
    #[serde(default)]
    pub loopback: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            wwpn: Self::default_wwpn(),
            wwnn: Self::default_wwnn(),
            kind: PortKind::Physical,
            fc4_types: Self::default_fc4_types(),
            max_nodes: Self::default_max_nodes(),
            loopback: false,
        }
    }
}

impl PortConfig {
    fn default_wwpn() -> Wwn { Wwn::new(0x1000_0000_c9a0_0001) }
    fn default_wwnn() -> Wwn { Wwn::new(0x2000_0000_c9a0_0001) }
    fn default_fc4_types() -> Vec<Fc4Type> { vec![Fc4Type::Fcp] }
    fn default_max_nodes() -> usize { 512 }

    /// Configured FC-4 types as a set.
    pub fn fc4_set(&self) -> Fc4Types {
        self.fc4_types.iter().copied().collect()
    }

    pub(super) fn merge(&mut self, other: PortConfig) {
        let default = PortConfig::default();
        if other.wwpn != default.wwpn {
            self.wwpn = other.wwpn;
        }
        if other.wwnn != default.wwnn {
            self.wwnn = other.wwnn;
        }
        if other.kind != default.kind {
            self.kind = other.kind;
        }
        if other.fc4_types != default.fc4_types {
            self.fc4_types = other.fc4_types;
        }
        if other.max_nodes != default.max_nodes {
            self.max_nodes = other.max_nodes;
        }
        if other.loopback {
            self.loopback = true;
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Discovery fan-out (`discovery.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Concurrent PLOGI/ADISC exchanges (`discovery.max_outstanding`).
    #[serde(default = "DiscoveryConfig::default_max_outstanding")]
    pub max_outstanding: usize,
    /// Revalidate surviving logins with ADISC instead of a fresh PLOGI
    /// (`discovery.use_adisc`).
    #[serde(default)]
    pub use_adisc: bool,
    /// RSCN payloads held while discovery runs before falling back to a
    /// full rediscovery (`discovery.rscn_capacity`).
    #[serde(default = "DiscoveryConfig::default_rscn_capacity")]
    pub rscn_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 32,
            use_adisc: false,
            rscn_capacity: 32,
        }
    }
}

impl DiscoveryConfig {
    fn default_max_outstanding() -> usize { 32 }
    fn default_rscn_capacity() -> usize { 32 }

    pub(super) fn merge(&mut self, other: DiscoveryConfig) {
        let default = DiscoveryConfig::default();
        if other.max_outstanding != default.max_outstanding {
            self.max_outstanding = other.max_outstanding;
        }
        if other.use_adisc {
            self.use_adisc = true;
        }
        if other.rscn_capacity != default.rscn_capacity {
            self.rscn_capacity = other.rscn_capacity;
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Retry bounds (`retry.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Default attempt bound for PLOGI/PRLI/ADISC (`retry.max_els_tries`).
    #[serde(default = "RetryConfig::default_max_els_tries")]
    pub max_els_tries: u32,
    /// Gate backoff after a busy response (`retry.fabric_busy_backoff_ms`).
    #[serde(default = "RetryConfig::default_fabric_busy_backoff_ms")]
    pub fabric_busy_backoff_ms: u64,
    /// Device-loss timeout in seconds (`retry.devloss_tmo_secs`).
    #[serde(default = "RetryConfig::default_devloss_tmo_secs")]
    pub devloss_tmo_secs: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_els_tries: 3,
            fabric_busy_backoff_ms: 100,
            devloss_tmo_secs: 30,
        }
    }
}

impl RetryConfig {
    fn default_max_els_tries() -> u32 { 3 }
    fn default_fabric_busy_backoff_ms() -> u64 { 100 }
    fn default_devloss_tmo_secs() -> u32 { 30 }

    /// Policy handed to the retry engine.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_els_tries: self.max_els_tries,
            fabric_busy_backoff_ms: self.fabric_busy_backoff_ms,
            devloss_tmo_secs: self.devloss_tmo_secs,
        }
    }

    pub(super) fn merge(&mut self, other: RetryConfig) {
        let default = RetryConfig::default();
        if other.max_els_tries != default.max_els_tries {
            self.max_els_tries = other.max_els_tries;
        }
        if other.fabric_busy_backoff_ms != default.fabric_busy_backoff_ms {
            self.fabric_busy_backoff_ms = other.fabric_busy_backoff_ms;
        }
        if other.devloss_tmo_secs != default.devloss_tmo_secs {
            self.devloss_tmo_secs = other.devloss_tmo_secs;
        }
    }
}

// ============================================================================
// Timers and Buffers
// ============================================================================

/// Timers (`timers.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Resource allocation timeout in seconds; ELS exchanges time out after
    /// twice this (`timers.ratov_secs`).
    #[serde(default = "TimerConfig::default_ratov_secs")]
    pub ratov_secs: u64,
    /// Event loop tick in milliseconds (`timers.tick_ms`).
    #[serde(default = "TimerConfig::default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ratov_secs: 10,
            tick_ms: 100,
        }
    }
}

impl TimerConfig {
    fn default_ratov_secs() -> u64 { 10 }
    fn default_tick_ms() -> u64 { 100 }

    /// Deadline applied to every ELS exchange.
    pub fn els_timeout_ms(&self) -> u64 {
        self.ratov_secs * 2 * 1000
    }

    pub(super) fn merge(&mut self, other: TimerConfig) {
        let default = TimerConfig::default();
        if other.ratov_secs != default.ratov_secs {
            self.ratov_secs = other.ratov_secs;
        }
        if other.tick_ms != default.tick_ms {
            self.tick_ms = other.tick_ms;
        }
    }
}

/// Channel sizes (`buffers.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffersConfig {
    /// Link event channel capacity (`buffers.link_channel`).
    #[serde(default = "BuffersConfig::default_link_channel")]
    pub link_channel: usize,
    /// Administrative command channel capacity (`buffers.admin_channel`).
    #[serde(default = "BuffersConfig::default_admin_channel")]
    pub admin_channel: usize,
    /// Port event channel capacity (`buffers.event_channel`).
    #[serde(default = "BuffersConfig::default_event_channel")]
    pub event_channel: usize,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            link_channel: 1024,
            admin_channel: 64,
            event_channel: 256,
        }
    }
}

impl BuffersConfig {
    fn default_link_channel() -> usize { 1024 }
    fn default_admin_channel() -> usize { 64 }
    fn default_event_channel() -> usize { 256 }

    pub(super) fn merge(&mut self, other: BuffersConfig) {
        let default = BuffersConfig::default();
        if other.link_channel != default.link_channel {
            self.link_channel = other.link_channel;
        }
        if other.admin_channel != default.admin_channel {
            self.admin_channel = other.admin_channel;
        }
        if other.event_channel != default.event_channel {
            self.event_channel = other.event_channel;
        }
    }
}
