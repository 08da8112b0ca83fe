//! Configuration system for the mesh daemon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/emergency-mesh/config.toml
//!   3. ~/.config/emergency-mesh/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub reconnect: ReconnectConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed peer identifier. Empty = let the transport assign one.
    pub peer_id: String,
    /// How many times to ask the transport for an identifier before giving up.
    pub register_attempts: u32,
    /// Pause between registration attempts, in milliseconds.
    pub register_retry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address the peer transport listens on. Port 0 = OS-assigned.
    pub listen_addr: String,
    /// Host other local peers should dial. Empty = derive from listen_addr.
    pub advertise_host: String,
    /// Port of the local HTTP API.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Key namespace inside the shared registry.
    pub namespace: String,
    /// Directory backing the shared registry.
    pub registry_path: PathBuf,
    /// Presence records older than this are ignored and swept.
    pub ttl_secs: u64,
    pub advertise_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// Capability tags written into our presence record.
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Each further retry waits `growth_factor` times longer.
    pub growth_factor: f64,
    /// Retries per peer before it is reported unreachable.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Most message ids remembered for duplicate suppression.
    pub seen_capacity: usize,
    /// Forget ids older than this. 0 = only evict by capacity.
    pub seen_max_age_secs: u64,
    /// Delivered messages kept for the API. 0 = unlimited.
    pub store_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            register_attempts: 3,
            register_retry_ms: 1_000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            advertise_host: String::new(),
            api_port: 9101,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "emergency-mesh-peer".to_string(),
            registry_path: data_dir().join("registry"),
            ttl_secs: 60,
            advertise_interval_secs: 20,
            scan_interval_secs: 5,
            sweep_interval_secs: 10,
            capabilities: vec!["messaging".to_string()],
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            growth_factor: 1.5,
            max_attempts: 3,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            seen_capacity: 10_000,
            seen_max_age_secs: 3_600,
            store_capacity: 1_000,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl IdentityConfig {
    pub fn register_retry(&self) -> Duration {
        Duration::from_millis(self.register_retry_ms)
    }
}

impl DiscoveryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_secs(self.advertise_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl RoutingConfig {
    pub fn seen_max_age(&self) -> Option<Duration> {
        (self.seen_max_age_secs > 0).then(|| Duration::from_secs(self.seen_max_age_secs))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("emergency-mesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("emergency-mesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the discovery and reconnect loops cannot run with.
    ///
    /// Every discovery interval must be shorter than the TTL, otherwise a
    /// healthy peer's record could expire between two refreshes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.discovery;
        if d.ttl_secs == 0 {
            return Err(invalid("discovery.ttl_secs", "must be greater than zero"));
        }
        for (field, value) in [
            ("discovery.advertise_interval_secs", d.advertise_interval_secs),
            ("discovery.scan_interval_secs", d.scan_interval_secs),
            ("discovery.sweep_interval_secs", d.sweep_interval_secs),
        ] {
            if value == 0 || value >= d.ttl_secs {
                return Err(invalid(
                    field,
                    format!("must be between 1 and {} (ttl_secs - 1), got {value}", d.ttl_secs - 1),
                ));
            }
        }
        if !(self.reconnect.growth_factor >= 1.0 && self.reconnect.growth_factor.is_finite()) {
            return Err(invalid("reconnect.growth_factor", "must be a finite value >= 1.0"));
        }
        if self.routing.seen_capacity == 0 {
            return Err(invalid("routing.seen_capacity", "must be greater than zero"));
        }
        if self.identity.register_attempts == 0 {
            return Err(invalid("identity.register_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Apply MESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESH_IDENTITY__PEER_ID") {
            self.identity.peer_id = v;
        }
        if let Ok(v) = std::env::var("MESH_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Ok(v) = std::env::var("MESH_NETWORK__ADVERTISE_HOST") {
            self.network.advertise_host = v;
        }
        if let Ok(v) = std::env::var("MESH_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_DISCOVERY__ENABLED") {
            self.discovery.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("MESH_DISCOVERY__REGISTRY_PATH") {
            self.discovery.registry_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MESH_DISCOVERY__NAMESPACE") {
            self.discovery.namespace = v;
        }
        if let Ok(v) = std::env::var("MESH_RECONNECT__MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.reconnect.max_attempts = n;
            }
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
