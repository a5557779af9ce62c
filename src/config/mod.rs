//! fcels Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./fcels.yaml` (current directory - highest priority)
//! 2. `~/.config/fcels/fcels.yaml` (user config directory)
//! 3. `/etc/fcels/fcels.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//!
//! # YAML Structure
//!
//! ```yaml
//! port:
//!   wwpn: "10:00:00:00:c9:a0:00:01"
//!   wwnn: "20:00:00:00:c9:a0:00:01"
//!   kind: physical
//!   fc4_types: [fcp, nvme]
//! discovery:
//!   max_outstanding: 32
//!   use_adisc: true
//! retry:
//!   max_els_tries: 3
//! timers:
//!   ratov_secs: 10
//! sim:
//!   topology: fabric
//!   peers:
//!     - did: "0x010200"
//!       wwpn: "50:00:00:00:00:00:02:01"
//!       wwnn: "50:00:00:00:00:00:02:00"
//! ```

mod port;
mod sim;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use port::{BuffersConfig, DiscoveryConfig, PortConfig, PortKind, RetryConfig, TimerConfig};
pub use sim::{SimConfig, SimPeer, SimTopology};

/// Default config filename.
const CONFIG_FILENAME: &str = "fcels.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local port identity (`port.*`).
    #[serde(default)]
    pub port: PortConfig,

    /// Discovery fan-out (`discovery.*`).
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Retry bounds (`retry.*`).
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timers (`timers.*`).
    #[serde(default)]
    pub timers: TimerConfig,

    /// Channel sizes (`buffers.*`).
    #[serde(default)]
    pub buffers: BuffersConfig,

    /// Simulated fabric (`sim.*`).
    #[serde(default)]
    pub sim: SimConfig,
}

impl Config {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        config.validate()?;
        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/fcels").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("fcels").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when they differ from
    /// the defaults.
    pub fn merge(&mut self, other: Config) {
        self.port.merge(other.port);
        self.discovery.merge(other.discovery);
        self.retry.merge(other.retry);
        self.timers.merge(other.timers);
        self.buffers.merge(other.buffers);
        self.sim.merge(other.sim);
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.wwpn.is_zero() {
            return Err(ConfigError::Invalid("port.wwpn must not be zero".into()));
        }
        if self.port.fc4_types.is_empty() {
            return Err(ConfigError::Invalid("port.fc4_types must not be empty".into()));
        }
        if self.discovery.max_outstanding == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_outstanding must be at least 1".into(),
            ));
        }
        if self.timers.tick_ms == 0 {
            return Err(ConfigError::Invalid("timers.tick_ms must be at least 1".into()));
        }
        Ok(())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Did, Wwn};
    use crate::protocol::Fc4Type;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port.kind, PortKind::Physical);
        assert_eq!(config.port.fc4_types, vec![Fc4Type::Fcp]);
        assert_eq!(config.discovery.max_outstanding, 32);
        assert_eq!(config.retry.max_els_tries, 3);
        assert_eq!(config.timers.els_timeout_ms(), 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_yaml_partial() {
        let yaml = r#"
port:
  wwpn: "10:00:00:00:c9:00:00:99"
  kind: virtual
  fc4_types: [fcp, nvme]
discovery:
  use_adisc: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port.wwpn, Wwn::new(0x1000_0000_c900_0099));
        assert_eq!(config.port.kind, PortKind::Virtual);
        assert_eq!(config.port.fc4_types, vec![Fc4Type::Fcp, Fc4Type::Nvme]);
        assert!(config.discovery.use_adisc);
        assert_eq!(config.discovery.max_outstanding, 32);
    }

    #[test]
    fn test_parse_sim_peers() {
        let yaml = r#"
sim:
  topology: point_to_point
  peers:
    - did: "0x000002"
      wwpn: "50:00:00:00:00:00:00:01"
      wwnn: "50:00:00:00:00:00:00:00"
      target: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sim.topology, SimTopology::PointToPoint);
        assert_eq!(config.sim.peers.len(), 1);
        let peer = config.sim.peer(Did::PT2PT_REMOTE).unwrap();
        assert!(!peer.target);
        assert_eq!(peer.fc4_types, vec![Fc4Type::Fcp]);
    }

    #[test]
    fn test_invalid_wwn_rejected() {
        let yaml = r#"
port:
  wwpn: "not-a-wwn"
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_merge_overrides_non_default() {
        let mut base = Config::new();
        base.retry.max_els_tries = 5;
        base.discovery.max_outstanding = 8;

        let mut other = Config::new();
        other.discovery.max_outstanding = 4;

        base.merge(other);
        assert_eq!(base.discovery.max_outstanding, 4);
        assert_eq!(base.retry.max_els_tries, 5);
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low = temp_dir.path().join("low.yaml");
        let high = temp_dir.path().join("high.yaml");

        fs::write(
            &low,
            r#"
retry:
  max_els_tries: 6
discovery:
  max_outstanding: 16
"#,
        )
        .unwrap();
        fs::write(
            &high,
            r#"
discovery:
  max_outstanding: 4
"#,
        )
        .unwrap();

        let (config, loaded) = Config::load_from_paths(&[low, high]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(config.discovery.max_outstanding, 4);
        assert_eq!(config.retry.max_els_tries, 6);
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");
        fs::write(&existing, "timers:\n  tick_ms: 50\n").unwrap();

        let (config, loaded) =
            Config::load_from_paths(&[missing, existing.clone()]).unwrap();
        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.timers.tick_ms, 50);
    }

    #[test]
    fn test_load_file_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "port: [unclosed").unwrap();
        assert!(matches!(
            Config::load_file(&path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zero.yaml");
        fs::write(&path, "discovery:\n  max_outstanding: 0\n").unwrap();
        assert!(matches!(
            Config::load_from_paths(&[path]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths.iter().all(|p| p.ends_with("fcels.yaml")));
        assert!(paths.iter().any(|p| p.starts_with("/etc/fcels")));
    }

    #[test]
    fn test_to_yaml_roundtrip() {
        let mut config = Config::new();
        config.port.fc4_types = vec![Fc4Type::Nvme];
        config.sim.assigned_did = Did::from_u24(0x0a0b0c);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("port:"));
        assert!(yaml.contains("nvme"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
