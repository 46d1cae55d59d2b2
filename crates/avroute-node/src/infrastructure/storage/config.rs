//! TOML configuration for one core.
//!
//! The file describes the plant this core owns (devices, connections,
//! sources, destinations, groups, static routes), the tie lines to other
//! cores, the network ports and the cost protocol timings.  The default
//! location is platform dependent:
//! - Windows:  `%APPDATA%\AVRoute\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/avroute/config.toml` or `~/.config/avroute/config.toml`
//! - macOS:    `~/Library/Application Support/AVRoute/config.toml`
//!
//! # Example
//!
//! ```toml
//! [core]
//! name = "north-core"
//! log_level = "info"
//!
//! [network]
//! message_port = 24900
//! discovery_port = 24901
//!
//! [[devices]]
//! device = 10
//! name = "Main matrix"
//! kind = "switcher"
//!
//! [[connections]]
//! id = 1
//! source = { device = 1, control = 0, address = 1 }
//! destination = { device = 10, control = 0, address = 1 }
//! connection_type = 3            # video | audio
//!
//! [[tie_lines]]
//! address = 1
//! endpoint = { device = 10, control = 0, address = 8 }
//! direction = "output"
//! connection_type = 3
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take `some_fn()`
//! when absent, so a minimal file (or no file at all) still yields a
//! runnable core.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use avroute_core::protocol::messages::TieLineDirection;
use avroute_core::{
    Address, Connection, ConnectionType, ControlId, DestinationGroup, Destination, DeviceId,
    EndpointInfo, Source, StaticRoute,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::cost_distribution::{ProtocolTimings, TieLine};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration of one core.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub core: CoreSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub groups: Vec<DestinationGroup>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    #[serde(default)]
    pub tie_lines: Vec<TieLineEntry>,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreSettings {
    /// Name announced to other cores.
    #[serde(default = "default_core_name")]
    pub name: String,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sockets used by the peer link and discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// Address the peer link and discovery sockets bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// UDP port for point-to-point protocol messages.
    #[serde(default = "default_message_port")]
    pub message_port: u16,
    /// UDP port for announce broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: Ipv4Addr,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
}

/// Cost distribution periods, in seconds, and the per-hop cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolSettings {
    #[serde(default = "default_regular_update_secs")]
    pub regular_update_secs: u64,
    #[serde(default = "default_update_jitter_secs")]
    pub update_jitter_secs: u64,
    #[serde(default = "default_triggered_cooldown_secs")]
    pub triggered_cooldown_secs: u64,
    #[serde(default = "default_route_timeout_secs")]
    pub route_timeout_secs: u64,
    #[serde(default = "default_deletion_delay_secs")]
    pub deletion_delay_secs: u64,
    #[serde(default = "default_hop_cost")]
    pub hop_cost: f32,
}

/// What a configured device control can do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Source,
    Destination,
    Switcher,
}

/// A device control to register with the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub device: DeviceId,
    #[serde(default)]
    pub control: ControlId,
    pub name: String,
    pub kind: DeviceKind,
}

/// A cable to another core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TieLineEntry {
    /// Tie-line number; the core at the other end uses the same value.
    pub address: Address,
    /// Local switcher output (`direction = "output"`) or input (`"input"`).
    pub endpoint: EndpointInfo,
    pub direction: TieLineDirection,
    pub connection_type: ConnectionType,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_core_name() -> String {
    "avroute-core".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_message_port() -> u16 {
    24900
}
fn default_discovery_port() -> u16 {
    24901
}
fn default_broadcast_address() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}
fn default_announce_interval_secs() -> u64 {
    5
}
fn default_regular_update_secs() -> u64 {
    30
}
fn default_update_jitter_secs() -> u64 {
    5
}
fn default_triggered_cooldown_secs() -> u64 {
    2
}
fn default_route_timeout_secs() -> u64 {
    180
}
fn default_deletion_delay_secs() -> u64 {
    120
}
fn default_hop_cost() -> f32 {
    1.0
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            name: default_core_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            message_port: default_message_port(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            announce_interval_secs: default_announce_interval_secs(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            regular_update_secs: default_regular_update_secs(),
            update_jitter_secs: default_update_jitter_secs(),
            triggered_cooldown_secs: default_triggered_cooldown_secs(),
            route_timeout_secs: default_route_timeout_secs(),
            deletion_delay_secs: default_deletion_delay_secs(),
            hop_cost: default_hop_cost(),
        }
    }
}

impl ProtocolSettings {
    pub fn timings(&self) -> ProtocolTimings {
        ProtocolTimings {
            regular_update: Duration::from_secs(self.regular_update_secs),
            update_jitter: Duration::from_secs(self.update_jitter_secs),
            triggered_cooldown: Duration::from_secs(self.triggered_cooldown_secs),
            route_timeout: Duration::from_secs(self.route_timeout_secs),
            deletion_delay: Duration::from_secs(self.deletion_delay_secs),
            hop_cost: self.hop_cost,
        }
    }
}

impl NodeConfig {
    pub fn tie_lines(&self) -> Vec<TieLine> {
        self.tie_lines
            .iter()
            .map(|entry| TieLine {
                address: entry.address,
                endpoint: entry.endpoint,
                direction: entry.direction,
                connection_type: entry.connection_type,
            })
            .collect()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads a config file, returning `NodeConfig::default()` if it does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `AVRoute`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("AVRoute"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("avroute"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("AVRoute")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use avroute_core::{ConnectionId, SourceId};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("avroute-config-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_has_expected_ports() {
        // Arrange / Act
        let cfg = NodeConfig::default();

        // Assert
        assert_eq!(cfg.network.message_port, 24900);
        assert_eq!(cfg.network.discovery_port, 24901);
        assert_eq!(cfg.core.log_level, "info");
    }

    #[test]
    fn test_default_protocol_settings_give_standard_timings() {
        let timings = ProtocolSettings::default().timings();

        assert_eq!(timings, ProtocolTimings::default());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg: NodeConfig = toml::from_str("").expect("parse");

        assert_eq!(cfg, NodeConfig::default());
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_plant_sections_parse() {
        // Arrange
        let text = r#"
            [core]
            name = "north"

            [protocol]
            route_timeout_secs = 60

            [[devices]]
            device = 10
            name = "Main matrix"
            kind = "switcher"

            [[connections]]
            id = 1
            source = { device = 1, control = 0, address = 1 }
            destination = { device = 10, control = 0, address = 1 }
            connection_type = 3

            [[sources]]
            id = 7
            name = "Lectern PC"
            endpoint = { device = 1, control = 0, address = 1 }
            connection_type = 3

            [[tie_lines]]
            address = 2
            endpoint = { device = 10, control = 0, address = 8 }
            direction = "output"
            connection_type = 1
        "#;

        // Act
        let cfg: NodeConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.core.name, "north");
        assert_eq!(cfg.core.log_level, "info");
        assert_eq!(cfg.protocol.timings().route_timeout, Duration::from_secs(60));
        assert_eq!(cfg.devices[0].kind, DeviceKind::Switcher);
        assert_eq!(cfg.devices[0].control, 0);
        assert_eq!(cfg.connections[0].id, ConnectionId(1));
        assert_eq!(
            cfg.connections[0].connection_type,
            ConnectionType::VIDEO | ConnectionType::AUDIO
        );
        assert_eq!(cfg.sources[0].id, SourceId(7));
        assert!(!cfg.sources[0].remote);
        let ties = cfg.tie_lines();
        assert_eq!(ties[0].direction, TieLineDirection::Output);
        assert_eq!(ties[0].endpoint, EndpointInfo::new(10, 0, 8));
    }

    #[test]
    fn test_unknown_device_kind_is_rejected() {
        let text = r#"
            [[devices]]
            device = 1
            name = "x"
            kind = "toaster"
        "#;

        assert!(toml::from_str::<NodeConfig>(text).is_err());
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_file_yields_default() {
        let cfg = load_config_from(&temp_path("absent.toml")).expect("load");

        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_config() {
        // Arrange
        let path = temp_path("config.toml");
        let mut cfg = NodeConfig::default();
        cfg.core.name = "south".to_string();
        cfg.network.message_port = 25000;
        cfg.tie_lines.push(TieLineEntry {
            address: 4,
            endpoint: EndpointInfo::new(20, 0, 3),
            direction: TieLineDirection::Input,
            connection_type: ConnectionType::AUDIO,
        });

        // Act
        save_config_to(&cfg, &path).expect("save");
        let restored = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(restored, cfg);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_malformed_file_reports_parse_error() {
        let path = temp_path("broken.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[core\nname = ").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
